// End-to-end execution through assembled images.

use std::collections::HashMap;

use glulx_core::{ImageBuilder, NullIo, Vm, VmConfig, VmError};
use pretty_assertions::assert_eq;

fn boot(source: &str) -> (Vm, HashMap<String, u32>) {
    let image = ImageBuilder::new(source).build().unwrap();
    let config = VmConfig {
        rng_seed: Some(1),
        ..VmConfig::default()
    };
    let vm = Vm::new(&image.bytes, config, Box::new(NullIo)).unwrap();
    (vm, image.labels)
}

fn word(vm: &Vm, labels: &HashMap<String, u32>, label: &str) -> u32 {
    vm.memory().read_u32(labels[label]).unwrap()
}

#[test]
fn recursive_calls_unwind_frames() {
    let (mut vm, labels) = boot(
        r#"
main:
    .function local 4 1
    callfi fact #5 mem:result
    quit
fact:
    .function local 4 1
    jgt l0 #1 recurse
    return #1
recurse:
    sub l0 #1 sp
    callfi fact sp sp
    mul l0 sp sp
    return sp
.ram
result: .word 0
"#,
    );
    vm.run().unwrap();
    assert_eq!(word(&vm, &labels, "result"), 120);
    assert_eq!(vm.stack().frame_ptr(), 0);
}

#[test]
fn add_wraps_without_trapping() {
    let (mut vm, labels) = boot(
        r#"
main:
    .function local
    add #0x7FFFFFFF #1 mem:sum
    sub #0 #1 mem:diff
    quit
.ram
sum: .word 0
diff: .word 0
"#,
    );
    vm.run().unwrap();
    assert_eq!(word(&vm, &labels, "sum"), 0x8000_0000);
    assert_eq!(word(&vm, &labels, "diff"), 0xFFFF_FFFF);
}

#[test]
fn throw_returns_to_catch_point() {
    let (mut vm, labels) = boot(
        r#"
main:
    .function local 4 1
    catch l0 setup
    copy l0 mem:result
    quit
setup:
    copy l0 sp
    call thrower #1 _
    copy #1 mem:result
    quit
thrower:
    .function local 4 1
    throw #77 l0
.ram
result: .word 0
"#,
    );
    vm.run().unwrap();
    assert_eq!(word(&vm, &labels, "result"), 77);
}

#[test]
fn throw_with_stale_token_is_fatal() {
    let (mut vm, _) = boot(
        r#"
main:
    .function local
    throw #1 #0x40
"#,
    );
    assert!(matches!(vm.run(), Err(VmError::BadCatchToken(0x40))));
    assert!(vm.is_halted());
}

#[test]
fn heap_grows_and_shrinks_memory() {
    let (mut vm, labels) = boot(
        r#"
main:
    .function local 4 2
    getmemsize mem:before
    malloc #16 l0
    malloc #32 l4
    astore l0 #0 #0x1234
    mfree l0
    getmemsize mem:during
    copy l4 mem:second
    mfree l4
    getmemsize mem:after
    quit
.ram
before: .word 0
during: .word 0
after: .word 0
second: .word 0
"#,
    );
    vm.run().unwrap();
    let before = word(&vm, &labels, "before");
    assert!(word(&vm, &labels, "during") > before);
    assert_eq!(word(&vm, &labels, "after"), before);
    assert_eq!(word(&vm, &labels, "second"), before + 16);
    assert!(!vm.heap().is_active());
    assert_eq!(vm.stats().heap_blocks, 0);
}

#[test]
fn writes_to_rom_are_rejected() {
    let (mut vm, _) = boot(
        r#"
main:
    .function local
    copy #1 mem:0x40
    quit
"#,
    );
    assert!(matches!(vm.run(), Err(VmError::ReadOnlyWrite(0x40))));
}

#[test]
fn restart_keeps_protected_bytes() {
    let (mut vm, labels) = boot(
        r#"
main:
    .function local
    jne mem:keep #0 done
    copy #9 mem:keep
    copy #9 mem:lose
    protect keep #4
    restart
done:
    copy mem:lose mem:seen
    quit
.ram
keep: .word 0
lose: .word 0
seen: .word 0xFF
"#,
    );
    vm.run().unwrap();
    assert_eq!(word(&vm, &labels, "keep"), 9);
    assert_eq!(word(&vm, &labels, "lose"), 0);
    assert_eq!(word(&vm, &labels, "seen"), 0);
}
