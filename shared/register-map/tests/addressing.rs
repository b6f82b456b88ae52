use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use register_map::{ChainLink, Constraint, ErrorKind, RegisterId, RegisterMap};

fn start(map: &RegisterMap, register: RegisterId) -> Option<u64> {
    map.register(register).unwrap().start_address()
}

#[test]
fn test_first_register_starts_at_module_start() {
    let mut map = RegisterMap::new();
    let module = map.add_module("m").unwrap();
    let register = map.add_register(module, "r").unwrap();
    assert_eq!(map.module(module).unwrap().start_address(), Some(0));
    assert_eq!(start(&map, register), Some(0));
    assert_eq!(map.register(register).unwrap().previous(), ChainLink::Origin);
}

#[test]
fn test_alignment_after_fixed_address() {
    let mut map = RegisterMap::new();
    let module = map.add_module("m").unwrap();
    let first = map.add_register(module, "first").unwrap();
    map.set_register_constraint(first, Constraint::FixedAddress(0x10c))
        .unwrap();
    map.add_field(first, "word", (0, 31), None, false).unwrap();
    let second = map.add_register(module, "second").unwrap();
    map.set_register_constraint(second, Constraint::AlignmentMemoryUnits(4))
        .unwrap();

    assert_eq!(map.register(first).unwrap().end_address(), Some(0x10f));
    assert_eq!(start(&map, second), Some(0x110));
    assert_eq!(
        map.register(second).unwrap().previous(),
        ChainLink::After(first)
    );

    map.set_register_constraint(second, Constraint::AlignmentMemoryUnits(0x20))
        .unwrap();
    assert_eq!(start(&map, second), Some(0x120));
}

#[test]
fn test_page_register_is_skipped() {
    let mut map = RegisterMap::new();
    map.set_address_bits(16).unwrap();
    map.set_page_size(Some(0x10)).unwrap();
    let module = map.add_module("m").unwrap();
    let first = map.add_register(module, "first").unwrap();
    map.set_register_constraint(first, Constraint::FixedSizeMemoryUnits(14))
        .unwrap();
    let second = map.add_register(module, "second").unwrap();
    assert_eq!(map.register(first).unwrap().end_address(), Some(0xd));
    assert_eq!(start(&map, second), Some(0x10));

    map.set_page_size(None).unwrap();
    assert_eq!(start(&map, second), Some(0xe));
}

#[test]
fn test_page_size_must_exceed_page_register() {
    let mut map = RegisterMap::new();
    let error = map.set_page_size(Some(4)).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert_eq!(map.memory().page_size(), None);
}

#[test]
fn test_fixed_address_before_predecessor_is_rejected() {
    let mut map = RegisterMap::new();
    let module = map.add_module("m").unwrap();
    let first = map.add_register(module, "first").unwrap();
    map.add_field(first, "word", (0, 31), None, false).unwrap();
    let second = map.add_register(module, "second").unwrap();

    let error = map
        .set_register_constraint(second, Constraint::FixedAddress(2))
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Constraint);
    assert_eq!(error.entity(), Some("m.second"));
    assert_eq!(start(&map, second), Some(4));

    map.set_register_constraint(second, Constraint::FixedAddress(8))
        .unwrap();
    assert_eq!(start(&map, second), Some(8));

    // Growing the first register past the fixed address fails and rolls back.
    let error = map
        .add_field(first, "extra", (32, 95), None, false)
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Constraint);
    assert_eq!(map.register(first).unwrap().size_memory_units(), 4);
    assert!(map.register(first).unwrap().field("extra").is_none());
}

#[test]
fn test_fixed_address_must_be_aligned() {
    let mut map = RegisterMap::new();
    let module = map.add_module("m").unwrap();
    let register = map.add_register(module, "r").unwrap();
    map.set_register_constraint(register, Constraint::AlignmentMemoryUnits(4))
        .unwrap();
    let error = map
        .set_register_constraint(register, Constraint::FixedAddress(6))
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Constraint);
}

#[test]
fn test_register_past_maximum_address_is_rejected() {
    let mut map = RegisterMap::new();
    map.set_address_bits(8).unwrap();
    let module = map.add_module("m").unwrap();
    let register = map.add_register(module, "r").unwrap();
    map.set_register_constraint(register, Constraint::FixedAddress(0xff))
        .unwrap();
    let error = map
        .add_field(register, "wide", (0, 15), None, false)
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Constraint);
    assert_eq!(map.fields().count(), 0);

    let error = map
        .set_register_constraint(register, Constraint::FixedAddress(0x100))
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Configuration);
}

#[test]
fn test_modules_follow_each_other() {
    let mut map = RegisterMap::new();
    let first = map.add_module("first").unwrap();
    let word = map.add_register(first, "word").unwrap();
    map.add_field(word, "data", (0, 31), None, false).unwrap();
    let second = map.add_module("second").unwrap();
    let status = map.add_register(second, "status").unwrap();

    assert_eq!(map.module(first).unwrap().span_memory_units(), 4);
    assert_eq!(map.module(second).unwrap().start_address(), Some(4));
    assert_eq!(start(&map, status), Some(4));

    map.set_module_instances(first, 3).unwrap();
    assert_eq!(map.module(first).unwrap().instance_addresses(), [0, 4, 8]);
    assert_eq!(map.module(second).unwrap().start_address(), Some(12));
    assert_eq!(start(&map, status), Some(12));

    map.set_module_constraint(first, Constraint::FixedSizeMemoryUnits(8))
        .unwrap();
    assert_eq!(map.module(first).unwrap().instance_addresses(), [0, 8, 16]);
    assert_eq!(map.module(first).unwrap().end_address(), Some(23));
    assert_eq!(map.module(second).unwrap().start_address(), Some(24));
    assert_eq!(map.register(status).unwrap().module_offset(Some(24)), Some(0));
}

#[test]
fn test_module_instances_must_be_positive() {
    let mut map = RegisterMap::new();
    let module = map.add_module("m").unwrap();
    let error = map.set_module_instances(module, 0).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert_eq!(map.module(module).unwrap().instances(), 1);
}

#[test]
fn test_module_fixed_size_cannot_truncate() {
    let mut map = RegisterMap::new();
    let module = map.add_module("m").unwrap();
    let register = map.add_register(module, "r").unwrap();
    map.add_field(register, "data", (0, 31), None, false).unwrap();
    let error = map
        .set_module_constraint(module, Constraint::FixedSizeMemoryUnits(2))
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Constraint);
    assert!(map.module(module).unwrap().constraints().is_empty());
}

#[test]
fn test_base_address_moves_everything() {
    let mut map = RegisterMap::new();
    let first = map.add_module("first").unwrap();
    let a = map.add_register(first, "a").unwrap();
    let second = map.add_module("second").unwrap();
    let b = map.add_register(second, "b").unwrap();

    map.set_base_address(0x1000).unwrap();
    assert_eq!(map.module(first).unwrap().start_address(), Some(0x1000));
    assert_eq!(start(&map, a), Some(0x1000));
    assert_eq!(map.module(second).unwrap().start_address(), Some(0x1001));
    assert_eq!(start(&map, b), Some(0x1001));
    assert_eq!(map.module(second).unwrap().offset(0x1000), Some(1));
}

#[test]
fn test_moving_and_removing_registers_relinks_chain() {
    let mut map = RegisterMap::new();
    let module = map.add_module("m").unwrap();
    let a = map.add_register(module, "a").unwrap();
    let b = map.add_register(module, "b").unwrap();
    let c = map.add_register(module, "c").unwrap();

    map.move_register(c, 0).unwrap();
    assert_eq!(map.module(module).unwrap().registers(), [c, a, b]);
    assert_eq!(start(&map, c), Some(0));
    assert_eq!(start(&map, a), Some(1));
    assert_eq!(start(&map, b), Some(2));

    map.remove_register(a).unwrap();
    assert!(map.register(a).is_none());
    assert_eq!(start(&map, b), Some(1));
    assert_eq!(map.register(b).unwrap().previous(), ChainLink::After(c));

    let error = map.move_register(b, 5).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Configuration);
}

#[test]
fn test_moving_and_removing_modules_relinks_chain() {
    let mut map = RegisterMap::new();
    let first = map.add_module("first").unwrap();
    let wide = map.add_register(first, "wide").unwrap();
    map.add_field(wide, "data", (0, 15), None, false).unwrap();
    let second = map.add_module("second").unwrap();
    let narrow = map.add_register(second, "narrow").unwrap();

    map.move_module(second, 0).unwrap();
    assert_eq!(map.module(second).unwrap().start_address(), Some(0));
    assert_eq!(map.module(first).unwrap().start_address(), Some(1));
    assert_eq!(start(&map, wide), Some(1));

    map.remove_module(second).unwrap();
    assert!(map.register(narrow).is_none());
    assert_eq!(map.module(first).unwrap().start_address(), Some(0));
    assert_eq!(start(&map, wide), Some(0));
    assert_eq!(map.modules().count(), 1);
}

#[test]
fn test_duplicate_names_are_rejected() {
    let mut map = RegisterMap::new();
    let module = map.add_module("m").unwrap();
    map.add_register(module, "r").unwrap();
    assert_eq!(
        map.add_module("m").unwrap_err().kind(),
        ErrorKind::Configuration
    );
    assert_eq!(
        map.add_register(module, "r").unwrap_err().kind(),
        ErrorKind::Configuration
    );
    assert_eq!(
        map.add_register(module, "bad.name").unwrap_err().kind(),
        ErrorKind::Configuration
    );
}

#[derive(Clone, Debug)]
struct Layout {
    registers: Vec<(u32, Option<u64>)>,
}

impl Arbitrary for Layout {
    fn arbitrary(g: &mut Gen) -> Self {
        let count = usize::from(u8::arbitrary(g) % 8) + 1;
        let registers = (0..count)
            .map(|_| {
                let width = u32::from(u8::arbitrary(g) % 32) + 1;
                let alignment = match u8::arbitrary(g) % 5 {
                    0 => None,
                    shift => Some(1 << (shift - 1)),
                };
                (width, alignment)
            })
            .collect();
        Self { registers }
    }
}

#[quickcheck]
fn test_registers_never_overlap_and_honor_alignment(layout: Layout) -> bool {
    let mut map = RegisterMap::new();
    let Ok(module) = map.add_module("m") else {
        return false;
    };
    let mut ids = Vec::new();
    for (index, &(width, alignment)) in layout.registers.iter().enumerate() {
        let Ok(register) = map.add_register(module, &format!("r{index}")) else {
            return false;
        };
        if map
            .add_field(register, "data", (0, width - 1), None, false)
            .is_err()
        {
            return false;
        }
        if let Some(alignment) = alignment {
            if map
                .set_register_constraint(register, Constraint::AlignmentMemoryUnits(alignment))
                .is_err()
            {
                return false;
            }
        }
        ids.push((register, alignment));
    }

    let mut previous_end: Option<u64> = None;
    for (register, alignment) in ids {
        let instance = map.register(register).unwrap();
        let (Some(start), Some(end)) = (instance.start_address(), instance.end_address()) else {
            return false;
        };
        if alignment.map_or(false, |alignment| start % alignment != 0) {
            return false;
        }
        if previous_end.map_or(false, |previous| start <= previous) {
            return false;
        }
        previous_end = Some(end);
    }
    true
}
