// Save, restore, undo and autosave through the public surface.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use glulx_core::{ImageBuilder, MemoryIo, NullIo, SnapshotError, Vm, VmConfig};
use pretty_assertions::assert_eq;

fn boot(source: &str, config: VmConfig) -> (Vm, Rc<RefCell<MemoryIo>>, HashMap<String, u32>) {
    let image = ImageBuilder::new(source).build().unwrap();
    let io = Rc::new(RefCell::new(MemoryIo::new()));
    let vm = Vm::new(&image.bytes, config, Box::new(io.clone())).unwrap();
    (vm, io, image.labels)
}

fn word(vm: &Vm, labels: &HashMap<String, u32>, label: &str) -> u32 {
    vm.memory().read_u32(labels[label]).unwrap()
}

const SAVE_RESTORE: &str = r#"
main:
    .function local 4 1
    copy #7 l0
    save #1 mem:status
    jeq mem:status #-1 restored
    copy mem:status mem:first
    copy #99 l0
    copy #99 mem:marker
    restore #1 _
    quit
restored:
    copy l0 mem:final
    quit
.ram
status: .word 0
first: .word 0xFF
marker: .word 0
final: .word 0
"#;

#[test]
fn save_then_restore_resumes_after_save() {
    let (mut vm, io, labels) = boot(SAVE_RESTORE, VmConfig::default());
    vm.run().unwrap();
    assert_eq!(word(&vm, &labels, "status"), 0xFFFF_FFFF);
    assert_eq!(word(&vm, &labels, "first"), 0xFF);
    assert_eq!(word(&vm, &labels, "marker"), 0);
    assert_eq!(word(&vm, &labels, "final"), 7);

    let io = io.borrow();
    let save = &io.saves[&1];
    assert_eq!(&save[..4], b"FORM");
    assert_eq!(&save[8..12], b"IFZS");
}

#[test]
fn save_without_storage_reports_failure() {
    let image = ImageBuilder::new(SAVE_RESTORE).build().unwrap();
    let mut vm = Vm::new(&image.bytes, VmConfig::default(), Box::new(NullIo)).unwrap();
    vm.run().unwrap();
    // save stores 1; the failed restore then stores 1 to nowhere and falls through.
    assert_eq!(vm.memory().read_u32(image.labels["first"]).unwrap(), 1);
    assert_eq!(vm.memory().read_u32(image.labels["marker"]).unwrap(), 99);
    assert!(vm.is_halted());
}

#[test]
fn restore_rejects_foreign_saves() {
    let (mut vm, io, labels) = boot(
        r#"
main:
    .function local
    restore #3 mem:status
    quit
.ram
status: .word 0
"#,
        VmConfig::default(),
    );
    io.borrow_mut().saves.insert(3, b"FORM\0\0\0\x04IFZS".to_vec());
    vm.run().unwrap();
    assert_eq!(word(&vm, &labels, "status"), 1);
}

#[test]
fn restore_keeps_protected_range_and_heap() {
    let (mut vm, _, labels) = boot(
        r#"
main:
    .function local 4 1
    malloc #16 l0
    save #1 mem:status
    jeq mem:status #-1 restored
    mfree l0
    copy #9 mem:keep
    copy #9 mem:lose
    protect keep #4
    restore #1 _
    quit
restored:
    copy l0 mem:block
    quit
.ram
status: .word 0
keep: .word 0
lose: .word 0
block: .word 0
"#,
        VmConfig::default(),
    );
    let end_mem = vm.memory().end_mem();
    vm.run().unwrap();
    assert_eq!(word(&vm, &labels, "keep"), 9);
    assert_eq!(word(&vm, &labels, "lose"), 0);
    assert_eq!(word(&vm, &labels, "block"), end_mem);
    assert!(vm.heap().is_active());
    assert_eq!(vm.heap().allocated_blocks(), 1);
}

/// Three frames deep, with mixed-width locals and values on every level's
/// stack. `{dest}` is where the innermost `save` stores its result.
const NESTED: &str = r#"
main:
    .function local 4 2
    copy #11 l0
    copy #500 sp
    callfi outer #3 l4
    copy l4 mem:main_result
    copy sp mem:main_stack
    copy l0 mem:main_local
    quit
outer:
    .function local 4 2
    copy #22 l4
    copy #600 sp
    callfi inner l0 sp
    add sp l4 sp
    add sp sp sp
    return sp
inner:
    .function local 4 1 2 1 1 1
    copys #0x1234 l4
    copyb #0x56 l6
    copy #700 sp
    save #1 {dest}
    jeq {dest} #-1 restored
    copys #0 l4
    copyb #0 l6
    copy #1 mem:dirty
    restore #1 _
    return #999
restored:
    copys l4 sp
    copyb l6 sp
    add sp sp sp
    add sp sp sp
    return sp
.ram
main_result: .word 0
main_stack: .word 0
main_local: .word 0
dirty: .word 0
"#;

#[test]
fn nested_frames_survive_save_and_restore() {
    for dest in ["l0", "sp"] {
        let source = NESTED.replace("{dest}", dest);
        let (mut vm, io, labels) = boot(&source, VmConfig::default());
        vm.run().unwrap();

        // inner: 0x1234 + 0x56 + 700, outer adds 22 and 600
        assert_eq!(word(&vm, &labels, "main_result"), 0x128A + 700 + 22 + 600, "{}", dest);
        assert_eq!(word(&vm, &labels, "main_stack"), 500, "{}", dest);
        assert_eq!(word(&vm, &labels, "main_local"), 11, "{}", dest);
        assert_eq!(word(&vm, &labels, "dirty"), 0, "{}", dest);
        assert_eq!(vm.stack().sp(), 20, "{}", dest);
        assert!(io.borrow().saves.contains_key(&1));
    }
}

const CORRUPTIBLE: &str = r#"
main:
    .function local 4 1
    save #1 mem:status
    copy #99 mem:marker
    restore #1 mem:rstatus
    copy #1 mem:done
    quit
.ram
status: .word 0
marker: .word 0
rstatus: .word 0
done: .word 0
"#;

/// The call stub on top of the saved stack (last 16 bytes of `Stks`).
fn saved_stub(save: &mut [u8]) -> &mut [u8] {
    let mut pos = 12;
    loop {
        let len = u32::from_be_bytes(save[pos + 4..pos + 8].try_into().unwrap()) as usize;
        if &save[pos..pos + 4] == b"Stks" {
            let end = pos + 8 + len;
            return &mut save[end - 16..end];
        }
        pos += 8 + len + (len & 1);
    }
}

#[test]
fn restore_refuses_a_bad_resume_stub() {
    for (kind, addr) in [(0x99u32, 0u32), (0x11, 0), (1, 0x10)] {
        let (mut vm, io, labels) = boot(CORRUPTIBLE, VmConfig::default());
        vm.run_for(1).unwrap();
        {
            let mut io = io.borrow_mut();
            let stub = saved_stub(io.saves.get_mut(&1).unwrap());
            stub[..4].copy_from_slice(&kind.to_be_bytes());
            stub[4..8].copy_from_slice(&addr.to_be_bytes());
        }
        vm.run().unwrap();
        assert_eq!(word(&vm, &labels, "marker"), 99, "kind {:#x}", kind);
        assert_eq!(word(&vm, &labels, "rstatus"), 1, "kind {:#x}", kind);
        assert_eq!(word(&vm, &labels, "done"), 1, "kind {:#x}", kind);
    }
}

const UNDO: &str = r#"
main:
    .function local
    copy #5 mem:value
    saveundo mem:status
    jeq mem:status #-1 undone
    copy #6 mem:value
    hasundo mem:has
    restoreundo _
    quit
undone:
    copy mem:value mem:after
    hasundo mem:has_after
    restoreundo mem:again
    quit
.ram
value: .word 0
status: .word 0
has: .word 0xFF
after: .word 0
has_after: .word 0
again: .word 0
"#;

#[test]
fn undo_round_trip() {
    let (mut vm, _, labels) = boot(UNDO, VmConfig::default());
    vm.run().unwrap();
    assert_eq!(word(&vm, &labels, "status"), 0xFFFF_FFFF);
    assert_eq!(word(&vm, &labels, "has"), 0xFF);
    assert_eq!(word(&vm, &labels, "after"), 5);
    assert_eq!(word(&vm, &labels, "has_after"), 1);
    assert_eq!(word(&vm, &labels, "again"), 1);
    assert_eq!(vm.stats().undo_depth, 0);
}

#[test]
fn undo_disabled_reports_failure() {
    let config = VmConfig {
        undo_levels: 0,
        ..VmConfig::default()
    };
    let (mut vm, _, labels) = boot(UNDO, config);
    vm.run().unwrap();
    assert_eq!(word(&vm, &labels, "value"), 6);
    assert_eq!(word(&vm, &labels, "status"), 1);
    assert_eq!(word(&vm, &labels, "after"), 0);
}

const COUNTER: &str = r#"
main:
    .function local 4 1
    setiosys #2 #0
loop:
    add l0 #1 l0
    streamnum l0
    jlt l0 #5 loop
    copy l0 mem:result
    quit
.ram
result: .word 0
"#;

#[test]
fn autosave_resumes_in_a_fresh_vm() {
    let (mut vm, io, labels) = boot(COUNTER, VmConfig::default());
    vm.run_for(7).unwrap();
    let pc = vm.pc();
    let snapshot = vm.autosave().unwrap();
    assert_eq!(vm.stack().sp(), 16);
    vm.run().unwrap();
    assert_eq!(io.borrow().output, "12345");

    let (mut fresh, fresh_io, _) = boot(COUNTER, VmConfig::default());
    fresh.autorestore(&snapshot).unwrap();
    assert_eq!(fresh.pc(), pc);
    fresh.run().unwrap();
    assert_eq!(fresh.memory().read_u32(labels["result"]).unwrap(), 5);
    // iosys came back with the snapshot
    assert_eq!(fresh_io.borrow().output, "345");
}

#[test]
fn autorestore_rejects_garbage_without_side_effects() {
    let (mut vm, _, _) = boot(COUNTER, VmConfig::default());
    vm.run_for(2).unwrap();
    let pc = vm.pc();
    assert!(matches!(
        vm.autorestore(b"not a save"),
        Err(SnapshotError::Truncated | SnapshotError::NotASaveFile)
    ));
    assert_eq!(vm.pc(), pc);
    assert!(!vm.is_halted());
}

#[test]
fn whole_memory_protect_survives_undo_and_restart() {
    let (mut vm, _, labels) = boot(
        r#"
main:
    .function local
    jne mem:passes #0 second
    copy #1 mem:passes
    protect #0 #-1
    saveundo mem:status
    jeq mem:status #-1 undone
    copy #7 mem:value
    restoreundo _
    quit
undone:
    restart
second:
    copy #2 mem:passes
    quit
.ram
passes: .word 0
status: .word 0
value: .word 0
"#,
        VmConfig::default(),
    );
    vm.run().unwrap();
    // everything was protected, so neither the undo nor the restart rolled RAM back
    assert_eq!(word(&vm, &labels, "passes"), 2);
    assert_eq!(word(&vm, &labels, "value"), 7);
    assert_eq!(word(&vm, &labels, "status"), 0xFFFF_FFFF);
}
