// Output system behaviour in each I/O mode.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use glulx_core::{ImageBuilder, IoMode, MemoryIo, Vm, VmConfig};
use pretty_assertions::assert_eq;

/// Decoding table: `H` = 00, `i` = 01, the embedded string "ok" = 10,
/// terminator = 11 (bits read from the low end of each byte).
const TABLE: &str = r#"
table:
    .word 0 7 root
root: .byte 0
    .word left right
left: .byte 0
    .word h_node i_node
right: .byte 0
    .word ok_node term
h_node: .byte 2 0x48
i_node: .byte 2 0x69
ok_node: .byte 3 0x6F 0x6B 0
term: .byte 1
greeting: .byte 0xE1 0xD8 0
latin: .string "ab"
wide: .unistring "z☺"
"#;

const FILTER: &str = r#"
filter:
    .function local 4 1
    astoreb buf mem:count l0
    add mem:count #1 mem:count
    return #0
"#;

fn boot(main: &str) -> (Vm, Rc<RefCell<MemoryIo>>, HashMap<String, u32>) {
    let source = format!(
        "{}\n{}\n{}\n.ram\ncount: .word 0\nmode: .word 0\nrock: .word 0\nbuf: .space 64\n",
        main, FILTER, TABLE
    );
    let image = ImageBuilder::new(&source)
        .string_table("table")
        .build()
        .unwrap();
    let io = Rc::new(RefCell::new(MemoryIo::new()));
    let vm = Vm::new(&image.bytes, VmConfig::default(), Box::new(io.clone())).unwrap();
    (vm, io, image.labels)
}

fn filtered(vm: &Vm, labels: &HashMap<String, u32>) -> String {
    let count = vm.memory().read_u32(labels["count"]).unwrap();
    let bytes = vm.memory().slice(labels["buf"], count).unwrap();
    bytes.iter().map(|&b| b as char).collect()
}

#[test]
fn glk_mode_prints_every_string_kind() {
    let (mut vm, io, _) = boot(
        r#"
main:
    .function local
    setiosys #2 #0
    streamstr greeting
    streamstr latin
    streamstr wide
    streamchar #0x21
    streamnum #-42
    streamunichar #0xE9
    quit
"#,
    );
    vm.run().unwrap();
    assert_eq!(io.borrow().output, "Hiokabz\u{263A}!-42\u{E9}");
}

#[test]
fn null_mode_prints_nothing() {
    let (mut vm, io, _) = boot(
        r#"
main:
    .function local
    streamstr greeting
    streamnum #7
    quit
"#,
    );
    vm.run().unwrap();
    assert_eq!(io.borrow().output, "");
}

#[test]
fn filter_mode_calls_back_for_each_character() {
    let (mut vm, io, labels) = boot(
        r#"
main:
    .function local
    setiosys #1 filter
    streamstr greeting
    streamnum #-42
    streamstr latin
    streamchar #0x21
    getiosys mem:mode mem:rock
    quit
"#,
    );
    vm.run().unwrap();
    assert_eq!(filtered(&vm, &labels), "Hiok-42ab!");
    assert_eq!(io.borrow().output, "");
    assert_eq!(vm.iosys().mode, IoMode::Filter);
    assert_eq!(vm.memory().read_u32(labels["mode"]).unwrap(), 1);
    assert_eq!(vm.memory().read_u32(labels["rock"]).unwrap(), labels["filter"]);
    assert_eq!(vm.stack().frame_ptr(), 0);
}

#[test]
fn glk_calls_reach_the_bridge() {
    let (mut vm, io, _) = boot(
        r#"
main:
    .function local
    copy #3 sp
    copy #65 sp
    glk #0x80 #2 _
    quit
"#,
    );
    vm.run().unwrap();
    assert_eq!(io.borrow().calls, vec![(0x80, vec![65, 3])]);
}

#[test]
fn string_table_can_be_swapped() {
    let (mut vm, _, labels) = boot(
        r#"
main:
    .function local
    getstringtbl mem:mode
    setstringtbl #0
    getstringtbl mem:rock
    quit
"#,
    );
    vm.run().unwrap();
    assert_eq!(vm.memory().read_u32(labels["mode"]).unwrap(), labels["table"]);
    assert_eq!(vm.memory().read_u32(labels["rock"]).unwrap(), 0);
    assert_eq!(vm.string_table(), 0);
}
