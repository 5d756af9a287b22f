//! Unit tests for serialized program descriptions

mod utils;

use pktvm_core::jit::bytecode::Opcode;
use pktvm_core::jit::pipeline::JitOptions;
use pktvm_core::jit::program::Program;
use utils::insn;

#[test]
fn programs_round_trip_through_json() {
    let program = utils::program(
        vec![
            insn(Opcode::PushConst).leader().arg(10).build(),
            insn(Opcode::Switch).switch(2, &[(1, 3)]).build(),
            insn(Opcode::Ret).leader().ret().build(),
            insn(Opcode::Ret).leader().ret().build(),
        ],
        JitOptions {
            opt_level: 2,
            cross_block_elim: true,
            data_size: Some(128),
            ..JitOptions::default()
        },
    );

    let text = serde_json::to_string(&program).unwrap();
    let parsed = Program::from_json(&text).unwrap();
    let reserialized = serde_json::to_string(&parsed).unwrap();
    assert_eq!(text, reserialized);

    assert_eq!(parsed.segments.len(), 1);
    assert_eq!(parsed.segments[0].insns.len(), 4);
    assert_eq!(parsed.options.opt_level, 2);
    assert_eq!(parsed.options.data_size, Some(128));
}

#[test]
fn omitted_fields_take_defaults() {
    let text = r#"{
        "segments": [{
            "port": 0,
            "insns": [
                {"opcode": "PushConst", "flags": {"leader": true}, "arity": "None", "args": [5, 0]},
                {"opcode": "Ret", "flags": {"block_end": true, "ret": true}, "arity": "None"}
            ]
        }]
    }"#;
    let program = Program::from_json(text).unwrap();
    assert!(program.options.bounds_check);
    assert_eq!(program.options.opt_level, 1);
    assert!(!program.options.cross_block_elim);
    assert!(program.idoms.is_empty());
    assert_eq!(program.segments[0].insns[0].args[0], 5);
}

#[test]
fn invalid_descriptions_are_rejected() {
    assert!(Program::from_json("{").is_err());
    assert!(Program::from_json(r#"{"segments": [{"port": 0}]}"#).is_err());
}
