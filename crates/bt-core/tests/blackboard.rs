use std::cell::RefCell;
use std::rc::Rc;

use bt_core::{
    BbKey, Blackboard, BlackboardDef, BlackboardError, EntityId, KeyId, ObserverResult, Value,
    ValueType,
};

fn base_def() -> std::sync::Arc<BlackboardDef> {
    BlackboardDef::builder("base")
        .key("alive", ValueType::Bool)
        .key("ammo", ValueType::Int)
        .build()
        .expect("base def")
}

#[test]
fn values_start_at_type_defaults() {
    let def = base_def();
    let bb = Blackboard::new(def.clone());
    let alive: BbKey<bool> = def.key("alive").unwrap();
    let ammo: BbKey<i32> = def.key("ammo").unwrap();

    assert_eq!(bb.get(alive), Ok(false));
    assert_eq!(bb.get(ammo), Ok(0));
    assert!(!bb.value(ammo.id()).unwrap().is_set());
}

#[test]
fn typed_key_resolution_checks_declared_type() {
    let def = base_def();
    let err = def.key::<f32>("ammo").unwrap_err();
    assert_eq!(
        err,
        BlackboardError::TypeMismatch {
            key: KeyId(1),
            expected: ValueType::Float,
            actual: ValueType::Int,
        }
    );
    assert_eq!(
        def.key::<bool>("missing").unwrap_err(),
        BlackboardError::UnknownName("missing".to_string())
    );
}

#[test]
fn untyped_write_with_wrong_type_fails_without_changing_value() {
    let def = base_def();
    let mut bb = Blackboard::new(def.clone());
    let ammo = def.find_key("ammo").unwrap();

    let err = bb.set_value(ammo, Value::Float(1.0)).unwrap_err();
    assert!(matches!(err, BlackboardError::TypeMismatch { .. }));
    assert_eq!(bb.value(ammo).unwrap(), &Value::Int(0));

    assert_eq!(
        bb.set_value(KeyId(42), Value::Int(1)),
        Err(BlackboardError::UnknownKey(KeyId(42)))
    );
}

#[test]
fn observers_fire_only_on_change() {
    let def = base_def();
    let mut bb = Blackboard::new(def.clone());
    let ammo: BbKey<i32> = def.key("ammo").unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    bb.observe(ammo.id(), move |key, value| {
        sink.borrow_mut().push((key, value.clone()));
        ObserverResult::Keep
    })
    .unwrap();

    assert_eq!(bb.set(ammo, 5), Ok(true));
    assert_eq!(bb.set(ammo, 5), Ok(false));
    assert_eq!(bb.set(ammo, 6), Ok(true));

    assert_eq!(
        *seen.borrow(),
        vec![(ammo.id(), Value::Int(5)), (ammo.id(), Value::Int(6))]
    );
}

#[test]
fn observer_returning_remove_unregisters_itself() {
    let def = base_def();
    let mut bb = Blackboard::new(def.clone());
    let alive: BbKey<bool> = def.key("alive").unwrap();

    let calls = Rc::new(RefCell::new(0u32));
    let counter = calls.clone();
    bb.observe(alive.id(), move |_, _| {
        *counter.borrow_mut() += 1;
        ObserverResult::Remove
    })
    .unwrap();
    assert_eq!(bb.observer_count(alive.id()), 1);

    bb.set(alive, true).unwrap();
    bb.set(alive, false).unwrap();

    assert_eq!(*calls.borrow(), 1);
    assert_eq!(bb.observer_count(alive.id()), 0);
}

#[test]
fn remove_observer_by_handle() {
    let def = base_def();
    let mut bb = Blackboard::new(def.clone());
    let ammo: BbKey<i32> = def.key("ammo").unwrap();

    let handle = bb.observe(ammo.id(), |_, _| ObserverResult::Keep).unwrap();
    assert!(bb.remove_observer(handle));
    assert!(!bb.remove_observer(handle));
    assert_eq!(bb.observer_count(ammo.id()), 0);
}

#[test]
fn clear_resets_to_default_and_notifies() {
    let def = BlackboardDef::builder("target")
        .key("target", ValueType::Entity)
        .build()
        .unwrap();
    let mut bb = Blackboard::new(def.clone());
    let target: BbKey<Option<EntityId>> = def.key("target").unwrap();

    bb.set(target, Some(EntityId(9))).unwrap();
    assert!(bb.value(target.id()).unwrap().is_set());

    assert_eq!(bb.clear(target.id()), Ok(true));
    assert_eq!(bb.get(target), Ok(None));
    assert_eq!(bb.clear(target.id()), Ok(false));
}

#[test]
fn child_definition_inherits_parent_keys_first() {
    let parent = base_def();
    let child = BlackboardDef::builder("soldier")
        .parent(parent.clone())
        .key("cover", ValueType::Vector)
        .build()
        .unwrap();

    assert_eq!(child.len(), 3);
    assert_eq!(child.find_key("alive"), Some(KeyId(0)));
    assert_eq!(child.find_key("cover"), Some(KeyId(2)));
    assert!(child.is_compatible_with(&parent));
    assert!(parent.is_compatible_with(&child));
}

#[test]
fn duplicate_keys_are_rejected_including_inherited_ones() {
    let err = BlackboardDef::builder("dup")
        .parent(base_def())
        .key("ammo", ValueType::Int)
        .build()
        .unwrap_err();
    assert_eq!(err, BlackboardError::DuplicateKey("ammo".to_string()));
}

#[test]
fn reordered_keys_are_incompatible() {
    let a = base_def();
    let b = BlackboardDef::builder("swapped")
        .key("ammo", ValueType::Int)
        .key("alive", ValueType::Bool)
        .build()
        .unwrap();
    assert!(!a.is_compatible_with(&b));

    let empty = BlackboardDef::empty("none");
    assert!(empty.is_compatible_with(&a));
}

#[test]
fn too_many_keys_is_an_error() {
    let mut builder = BlackboardDef::builder("huge");
    for i in 0..=BlackboardDef::MAX_KEYS {
        builder = builder.key(format!("k{i}"), ValueType::Int);
    }
    assert_eq!(
        builder.build().unwrap_err(),
        BlackboardError::TooManyKeys {
            max: BlackboardDef::MAX_KEYS
        }
    );
}
