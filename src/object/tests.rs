use super::*;
use crate::abi::mock::MockEngine;
use crate::types::{Primitive, TypeRegistry};

fn registry() -> TypeRegistry {
    TypeRegistry::new(Rc::new(MockEngine::new()))
}

fn pair(types: &TypeRegistry) -> TypeDescriptor {
    types
        .struct_of(&[
            (types.primitive(Primitive::I32), Some("x")),
            (types.primitive(Primitive::F64), Some("y")),
        ])
        .unwrap()
}

#[test]
fn test_array_bounds() {
    let types = registry();
    let array = NativeObject::allocate(&types.primitive(Primitive::I32), 4).unwrap();

    assert!(array.is_array());
    assert_eq!(array.count(), 4);
    assert_eq!(array.size_of(), 16);

    assert_eq!(array.index(4).err(), Some(FfiError::Index { index: 4, len: 4 }));
    let last = array.index(3).unwrap();
    assert_eq!(last.offset(), 12);

    array.set(3, &Value::Int(-5)).unwrap();
    assert_eq!(array.get(3).unwrap(), Value::Int(-5));
    assert_eq!(array.get(0).unwrap(), Value::Int(0));
}

#[test]
fn test_scalar_is_not_indexable() {
    let types = registry();
    let scalar = NativeObject::allocate(&types.primitive(Primitive::U16), 1).unwrap();
    assert!(!scalar.is_array());
    assert_eq!(scalar.get(0).err(), Some(FfiError::NotIndexable { kind: TypeKind::U16 }));
}

#[test]
fn test_allocation_rejects_bad_requests() {
    let types = registry();
    let int32 = types.primitive(Primitive::I32);
    assert!(NativeObject::allocate(&int32, 0).is_err());
    assert!(NativeObject::allocate(&types.primitive(Primitive::Void), 1).is_err());

    let array = types.array_of(&int32, 3).unwrap();
    assert_eq!(
        NativeObject::allocate(&array, 2).err(),
        Some(FfiError::Layout("nested array is not supported".into()))
    );
}

#[test]
fn test_array_descriptor_allocation() {
    let types = registry();
    let int16 = types.primitive(Primitive::I16);
    let array = NativeObject::allocate(&types.array_of(&int16, 6).unwrap(), 1).unwrap();

    assert!(array.is_array());
    assert_eq!(array.count(), 6);
    assert!(array.descriptor().is_same(&int16));
    assert_eq!(array.size_of(), 12);
}

#[test]
fn test_memory_starts_zeroed() {
    let types = registry();
    let object = NativeObject::allocate(&pair(&types), 3).unwrap();
    assert_eq!(object.size_of(), 48);
    assert!(object.as_bytes().iter().all(|&b| b == 0));
}

#[test]
fn test_with_value_fills_every_element() {
    let types = registry();
    let array = types.array_of(&types.primitive(Primitive::U8), 4).unwrap();
    let object = NativeObject::with_value(&array, &Value::Int(7)).unwrap();
    assert_eq!(object.as_bytes(), &[7, 7, 7, 7]);

    let scalar = NativeObject::with_value(&types.primitive(Primitive::F32), &Value::Float(0.5)).unwrap();
    assert_eq!(scalar.read().unwrap(), Value::Float(0.5));

    assert!(NativeObject::with_value(&types.primitive(Primitive::I32), &Value::string("no")).is_err());
}

#[test]
fn test_struct_fields() {
    let types = registry();
    let object = NativeObject::allocate(&pair(&types), 1).unwrap();

    object.set_field(&["x".into()], &Value::Int(3)).unwrap();
    object.set_field(&[FieldKey::Index(2)], &Value::Float(1.25)).unwrap();

    assert_eq!(object.get_field(&[FieldKey::Index(1)]).unwrap(), Value::Int(3));
    assert_eq!(object.get_field(&["y".into()]).unwrap(), Value::Float(1.25));

    let y = object.field(&["y".into()]).unwrap();
    assert_eq!(y.offset(), 8);
    assert_eq!(y.address().addr(), object.address().addr() + 8);

    assert_eq!(
        object.get_field(&["z".into()]).err(),
        Some(FfiError::Field { key: "z".into(), reason: "no such field" })
    );
}

#[test]
fn test_nested_field_chain() {
    let types = registry();
    let inner = pair(&types);
    let outer = types
        .struct_of(&[(types.primitive(Primitive::I64), Some("id")), (inner, Some("p"))])
        .unwrap();
    let object = NativeObject::allocate(&outer, 1).unwrap();

    object.set_field(&["p".into(), "x".into()], &Value::Int(42)).unwrap();
    let element = object.field(&["p".into(), "x".into()]).unwrap();
    assert_eq!(element.offset(), 8);
    assert_eq!(element.read().unwrap(), Value::Int(42));

    // Aggregate members read back as detached copies
    let p = object.get_field(&["p".into()]).unwrap();
    let p = p.as_object().unwrap();
    assert_eq!(p.get_field(&["x".into()]).unwrap(), Value::Int(42));
}

#[test]
fn test_field_on_non_struct() {
    let types = registry();
    let scalar = NativeObject::allocate(&types.primitive(Primitive::I32), 1).unwrap();
    assert_eq!(
        scalar.field(&["x".into()]).err(),
        Some(FfiError::Field { key: "x".into(), reason: "not a struct" })
    );

    let array = NativeObject::allocate(&pair(&types), 2).unwrap();
    assert!(array.field(&["x".into()]).is_err());
    assert_eq!(array.index(1).unwrap().offset(), 16);
}

#[test]
fn test_address_of_bounds() {
    let types = registry();
    let object = NativeObject::allocate(&types.primitive(Primitive::I64), 2).unwrap();
    let base = object.address().addr();

    assert_eq!(object.address_of(0).unwrap().addr(), base);
    assert_eq!(object.address_of(16).unwrap().addr(), base + 16);
    assert_eq!(
        object.address_of(17).err(),
        Some(FfiError::Bounds { offset: 17, size: 0, object_size: 16 })
    );
}

#[test]
fn test_struct_copy_identity() {
    let types = registry();
    let d = pair(&types);
    let twin = pair(&types);

    let source = NativeObject::allocate(&d, 1).unwrap();
    source.set_field(&["x".into()], &Value::Int(9)).unwrap();
    source.set_field(&["y".into()], &Value::Float(-3.0)).unwrap();

    let same = NativeObject::allocate(&d, 1).unwrap();
    same.copy_from(&source).unwrap();
    assert_eq!(same.as_bytes(), source.as_bytes());

    let other = NativeObject::allocate(&twin, 1).unwrap();
    assert_eq!(
        other.copy_from(&source).err(),
        Some(FfiError::TypeMismatch { expected: TypeKind::Struct, got: ValueCategory::NativeObject })
    );
    assert!(other.as_bytes().iter().all(|&b| b == 0));
}

#[test]
fn test_scalar_copy_by_kind() {
    let types = registry();
    let a = NativeObject::with_value(&types.primitive(Primitive::I32), &Value::Int(5)).unwrap();
    let b = NativeObject::allocate(&types.primitive(Primitive::I32), 1).unwrap();
    b.copy_from(&a).unwrap();
    assert_eq!(b.read().unwrap(), Value::Int(5));

    let c = NativeObject::allocate(&types.primitive(Primitive::U32), 1).unwrap();
    assert!(c.copy_from(&a).is_err());
}

#[test]
fn test_identity_equality() {
    let types = registry();
    let a = NativeObject::allocate(&types.primitive(Primitive::I32), 1).unwrap();
    let b = NativeObject::allocate(&types.primitive(Primitive::I32), 1).unwrap();
    assert_eq!(a, a.clone());
    assert_ne!(a, b);
}
