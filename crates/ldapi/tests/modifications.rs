//! Integration tests for the batch modification builder.

use ldapi::{Error, ModOperation, Modification};

#[test]
fn remove_all_never_carries_values() {
    let mut modification = Modification::replace("telephoneNumber", ["+1 555 0100"]);
    assert_eq!(modification.values().len(), 1);

    modification.set_operation(ModOperation::RemoveAll);
    assert!(modification.values().is_empty());

    let err = modification.set_values(["+1 555 0199"]).unwrap_err();
    assert!(matches!(err, Error::InvalidMode(_)));
    assert_eq!(err.error_code(), "INVALID_MODE");
    assert!(modification.values().is_empty());
}

#[test]
fn operations_parse_from_names_and_codes() {
    let cases = [
        ("add", 1, ModOperation::Add),
        ("remove", 2, ModOperation::Remove),
        ("remove_all", 18, ModOperation::RemoveAll),
        ("replace", 3, ModOperation::Replace),
    ];

    for (name, code, operation) in cases {
        assert_eq!(name.parse::<ModOperation>().unwrap(), operation);
        assert_eq!(ModOperation::from_code(code).unwrap(), operation);
        assert_eq!(operation.code(), code);
        assert_eq!(operation.to_string(), name);
    }

    assert!(matches!(
        "increment".parse::<ModOperation>(),
        Err(Error::InvalidMode(_))
    ));
}

#[test]
fn builder_setters_chain() {
    let mut modification = Modification::new();
    modification
        .set_attribute_name("description")
        .set_operation(ModOperation::Add)
        .set_values(["first", "second"])
        .unwrap();

    assert_eq!(modification.attribute_name(), Some("description"));
    assert_eq!(modification.operation(), Some(ModOperation::Add));
    assert_eq!(
        modification.values(),
        &[b"first".to_vec(), b"second".to_vec()]
    );
}

#[test]
fn binary_values_are_kept_verbatim() {
    let photo = vec![0xff_u8, 0xd8, 0xff, 0xe0];
    let modification = Modification::add("jpegPhoto", [photo.clone()]);
    assert_eq!(modification.values(), &[photo]);
}
