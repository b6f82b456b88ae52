use register_map::{
    BitInterval, BitMappingDocument, Constraint, ErrorKind, RegisterDocument, RegisterMap,
};
use serde_json::{json, Value};

fn sample() -> RegisterMap {
    let mut map = RegisterMap::new();
    map.set_address_bits(16).unwrap();
    map.set_page_size(Some(0x100)).unwrap();

    let uart = map.add_module("uart").unwrap();
    map.set_module_parameter(uart, "description", json!("UART block"))
        .unwrap();
    map.set_module_parameter(uart, "vendor", json!("acme")).unwrap();
    map.set_module_instances(uart, 2).unwrap();
    let ctrl = map.add_register(uart, "ctrl").unwrap();
    map.add_field(ctrl, "enable", (0, 0), None, false).unwrap();
    let divider = map.add_field(ctrl, "divider", (4, 11), None, false).unwrap();
    map.set_field_reset_value(divider, 0x1a).unwrap();
    map.set_register_parameter(ctrl, "mode", json!("w")).unwrap();
    map.set_register_parameter(ctrl, "owner", json!("io")).unwrap();
    let status = map.add_register(uart, "status").unwrap();
    map.set_register_constraint(status, Constraint::AlignmentMemoryUnits(4))
        .unwrap();
    let irq = map.add_field(status, "irq", (0, 2), None, true).unwrap();

    let dma = map.add_module("dma").unwrap();
    map.set_module_constraint(dma, Constraint::AlignmentMemoryUnits(0x10))
        .unwrap();
    let chan = map.add_register(dma, "chan").unwrap();
    map.add_field(chan, "irq", (0, 2), Some(BitInterval::new(3, 5)), false)
        .unwrap();
    map.set_field_parameter(irq, "description", json!("interrupt lines"))
        .unwrap();
    map
}

#[test]
fn test_sample_layout() {
    let map = sample();
    let uart = map.module_by_name("uart").unwrap();
    let dma = map.module_by_name("dma").unwrap();
    assert_eq!(map.module(uart).unwrap().span_memory_units(), 5);
    assert_eq!(map.module(uart).unwrap().instance_addresses(), [0, 5]);
    assert_eq!(map.module(dma).unwrap().start_address(), Some(0x10));
}

#[test]
fn test_document_round_trip() {
    let map = sample();
    let document = map.to_document();
    let restored = RegisterMap::from_document(&document).unwrap();
    assert_eq!(restored.to_document(), document);

    let text = map.to_json().unwrap();
    let reparsed = RegisterMap::from_json(&text).unwrap();
    assert_eq!(reparsed.to_document(), document);
}

#[test]
fn test_document_shape() {
    let map = sample();
    let value: Value = serde_json::from_str(&map.to_json().unwrap()).unwrap();
    assert_eq!(value["memory"]["addressBits"], json!(16));
    let uart = &value["modules"][0];
    assert_eq!(uart["name"], json!("uart"));
    assert_eq!(uart["vendor"], json!("acme"));
    assert_eq!(uart["_address"], json!(0));
    assert_eq!(uart["instances"], json!(2));
    let ctrl = &uart["registers"][0];
    assert_eq!(ctrl["mode"], json!("w"));
    assert_eq!(ctrl["owner"], json!("io"));
    assert_eq!(ctrl["_sizeMemoryUnits"], json!(2));
    assert_eq!(ctrl["bitmap"][1]["source"], json!([4, 11]));
    assert_eq!(ctrl["bitmap"][1]["destination"], json!([0, 7]));
    assert_eq!(ctrl["bitmap"][1]["destinationId"], json!("uart.ctrl.divider"));
    assert_eq!(ctrl["fields"][1]["resetValue"], json!(0x1a));
    let status = &uart["registers"][1];
    assert_eq!(status["constraints"], json!({"alignmentMemoryUnits": 4}));
    assert_eq!(status["fields"][0]["global"], json!(true));
    assert_eq!(status["fields"][0]["size"], json!(6));
    assert_eq!(status["bitmap"][0]["destinationId"], json!("irq"));
}

#[test]
fn test_computed_values_are_ignored_on_load() {
    let text = r#"{
        "modules": [{
            "name": "m",
            "_address": 4096,
            "_spanMemoryUnits": 99,
            "_note": "generated",
            "registers": [{"name": "r", "_address": 77, "_sizeMemoryUnits": 9}]
        }]
    }"#;
    let map = RegisterMap::from_json(text).unwrap();
    let module = map.module_by_name("m").unwrap();
    assert_eq!(map.module(module).unwrap().start_address(), Some(0));
    assert!(map.module(module).unwrap().user_parameters().is_empty());
    let register = map.register_by_name(module, "r").unwrap();
    assert_eq!(map.register(register).unwrap().start_address(), Some(0));
    assert_eq!(map.register(register).unwrap().size_memory_units(), 1);
}

#[test]
fn test_missing_name_is_a_parse_error() {
    let error = RegisterMap::from_json(r#"{"modules": [{"registers": []}]}"#).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Parse);
    let error = RegisterMap::from_json("not json").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Parse);
}

#[test]
fn test_dangling_destination_is_a_parse_error() {
    let text = r#"{
        "modules": [{
            "name": "m",
            "registers": [{
                "name": "r",
                "bitmap": [{"source": [0, 1], "destination": [0, 1], "destinationId": "nowhere"}]
            }]
        }]
    }"#;
    let error = RegisterMap::from_json(text).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Parse);
    assert_eq!(error.entity(), Some("m.r"));
}

#[test]
fn test_declared_field_without_bits_is_a_parse_error() {
    let text = r#"{
        "modules": [{
            "name": "m",
            "registers": [{"name": "r", "fields": [{"name": "f", "size": 4}]}]
        }]
    }"#;
    let error = RegisterMap::from_json(text).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Parse);
    assert_eq!(error.entity(), Some("m.r.f"));
}

#[test]
fn test_loaded_documents_are_validated() {
    let overlapping = r#"{
        "modules": [{
            "name": "m",
            "registers": [{
                "name": "r",
                "fields": [{"name": "a", "size": 4}, {"name": "b", "size": 4}],
                "bitmap": [
                    {"source": [0, 3], "destination": [0, 3], "destinationId": "m.r.a"},
                    {"source": [2, 5], "destination": [0, 3], "destinationId": "m.r.b"}
                ]
            }]
        }]
    }"#;
    let error = RegisterMap::from_json(overlapping).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Overlap);

    let bad_memory = r#"{"memory": {"memoryUnitBits": 0}}"#;
    let error = RegisterMap::from_json(bad_memory).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Configuration);

    let duplicate = r#"{"modules": [{"name": "m"}, {"name": "m"}]}"#;
    let error = RegisterMap::from_json(duplicate).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Configuration);
}

#[test]
fn test_import_links_existing_global_field() {
    let mut map = RegisterMap::new();
    let module = map.add_module("m").unwrap();
    let first = map.add_register(module, "first").unwrap();
    let shared = map.add_field(first, "g", (0, 3), None, true).unwrap();

    let document = RegisterDocument {
        address: None,
        size_memory_units: None,
        name: "second".to_owned(),
        mode: Default::default(),
        description: String::new(),
        summary: String::new(),
        public: true,
        global: false,
        constraints: Default::default(),
        fields: Vec::new(),
        bitmap: vec![BitMappingDocument {
            source: BitInterval::new(0, 3),
            destination: BitInterval::new(4, 7),
            destination_id: "g".to_owned(),
        }],
        user: Default::default(),
    };
    let second = map.import_register(module, &document).unwrap();
    assert_eq!(map.register(second).unwrap().field("g"), Some(shared));
    assert_eq!(map.field(shared).unwrap().size_bits(), 8);
    assert_eq!(map.register(second).unwrap().start_address(), Some(1));
}

#[test]
fn test_parent_is_not_a_field_parameter() {
    let mut map = RegisterMap::new();
    let module = map.add_module("m").unwrap();
    let register = map.add_register(module, "r").unwrap();
    let field = map.add_field(register, "f", (0, 3), None, false).unwrap();

    let error = map
        .set_field_parameter(field, "parent", json!("somewhere"))
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert_eq!(error.entity(), Some("m.r.f"));
    assert!(map.field(field).unwrap().user_parameters().is_empty());

    let text = map.to_json().unwrap();
    let reparsed = RegisterMap::from_json(&text).unwrap();
    assert_eq!(reparsed.to_document(), map.to_document());
}

#[test]
fn test_bare_destination_prefers_global_field_over_module() {
    let mut map = RegisterMap::new();
    let module = map.add_module("irq").unwrap();
    let first = map.add_register(module, "first").unwrap();
    let shared = map.add_field(first, "irq", (0, 3), None, true).unwrap();

    let document = RegisterDocument {
        address: None,
        size_memory_units: None,
        name: "second".to_owned(),
        mode: Default::default(),
        description: String::new(),
        summary: String::new(),
        public: true,
        global: false,
        constraints: Default::default(),
        fields: Vec::new(),
        bitmap: vec![BitMappingDocument {
            source: BitInterval::new(0, 3),
            destination: BitInterval::new(4, 7),
            destination_id: "irq".to_owned(),
        }],
        user: Default::default(),
    };
    let second = map.import_register(module, &document).unwrap();
    assert_eq!(map.register(second).unwrap().field("irq"), Some(shared));

    let text = map.to_json().unwrap();
    let reparsed = RegisterMap::from_json(&text).unwrap();
    assert_eq!(reparsed.to_document(), map.to_document());
}

#[test]
fn test_reversed_bit_interval_is_a_parse_error() {
    let text = r#"{
        "modules": [{
            "name": "m",
            "registers": [{
                "name": "r",
                "fields": [{"name": "f", "size": 5}],
                "bitmap": [{"source": [6, 2], "destination": [0, 4], "destinationId": "m.r.f"}]
            }]
        }]
    }"#;
    let error = RegisterMap::from_json(text).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Parse);
}
