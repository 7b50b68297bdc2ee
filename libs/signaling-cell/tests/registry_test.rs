use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use assert_matches::assert_matches;
use uuid::Uuid;

use signaling_cell::models::{Participant, ParticipantRole, SignalingError};
use signaling_cell::services::RoomRegistry;

#[test]
fn test_find_or_create_is_idempotent() {
    let registry = RoomRegistry::new();
    let consultation_id = Uuid::new_v4();

    let first = registry.find_or_create_for_consultation(consultation_id);
    let second = registry.find_or_create_for_consultation(consultation_id);

    assert_eq!(first.id, second.id);
    assert_eq!(first.consultation_id, Some(consultation_id));
    assert_eq!(registry.find_by_consultation(consultation_id), Some(first.id));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_concurrent_find_or_create_yields_one_room() {
    let registry = Arc::new(RoomRegistry::new());
    let consultation_id = Uuid::new_v4();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || registry.find_or_create_for_consultation(consultation_id).id)
        })
        .collect();

    let ids: HashSet<Uuid> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(ids.len(), 1);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_standalone_rooms_are_distinct() {
    let registry = RoomRegistry::new();

    let a = registry.create_standalone();
    let b = registry.create_standalone();

    assert_ne!(a.id, b.id);
    assert!(a.consultation_id.is_none());
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_two_slot_cap_with_replacement() {
    let registry = RoomRegistry::new();
    let room = registry.create_standalone();

    registry
        .add_participant(room.id, Participant::new("patient", Some(ParticipantRole::Patient)))
        .unwrap();
    registry
        .add_participant(room.id, Participant::new("clinician", Some(ParticipantRole::Clinician)))
        .unwrap();

    assert_matches!(
        registry.add_participant(room.id, Participant::new("intruder", None)),
        Err(SignalingError::RoomFull)
    );

    let participants = registry
        .add_participant(room.id, Participant::new("patient", None))
        .unwrap();
    assert_eq!(participants.len(), 2);
    assert_eq!(participants[0].user_id, "patient");
    assert_eq!(participants[0].role, None);
    assert_eq!(participants[1].user_id, "clinician");
}

#[test]
fn test_concurrent_joins_never_exceed_capacity() {
    let registry = Arc::new(RoomRegistry::new());
    let room_id = registry.create_standalone().id;

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let registry = registry.clone();
            thread::spawn(move || {
                registry
                    .add_participant(room_id, Participant::new(format!("user-{}", i), None))
                    .is_ok()
            })
        })
        .collect();

    let joined = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(joined, 2);
    assert_eq!(registry.participants(room_id).unwrap().len(), 2);
}

#[test]
fn test_remove_participant_frees_slot() {
    let registry = RoomRegistry::new();
    let room = registry.create_standalone();

    registry.add_participant(room.id, Participant::new("a", None)).unwrap();
    registry.add_participant(room.id, Participant::new("b", None)).unwrap();

    let removed = registry.remove_participant(room.id, "a").unwrap();
    assert_eq!(removed.user_id, "a");

    registry.add_participant(room.id, Participant::new("c", None)).unwrap();
    let ids: Vec<String> = registry
        .participants(room.id)
        .unwrap()
        .into_iter()
        .map(|p| p.user_id)
        .collect();
    assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
}

#[test]
fn test_end_destroys_room() {
    let registry = RoomRegistry::new();
    let consultation_id = Uuid::new_v4();
    let room = registry.find_or_create_for_consultation(consultation_id);
    registry.add_participant(room.id, Participant::new("a", None)).unwrap();

    let ended = registry.end_for_consultation(consultation_id).unwrap();
    assert_eq!(ended.id, room.id);

    assert!(registry.get(room.id).is_none());
    assert!(registry.participants(room.id).is_none());
    assert!(registry.is_empty());
    assert_matches!(
        registry.add_participant(room.id, Participant::new("a", None)),
        Err(SignalingError::RoomNotFound)
    );
}

#[test]
fn test_participant_equality_is_by_user_id() {
    let a = Participant::new("same", Some(ParticipantRole::Patient));
    let b = Participant::new("same", Some(ParticipantRole::Clinician));
    assert_eq!(a, b);

    let role: ParticipantRole = serde_json::from_str("\"doctor\"").unwrap();
    assert_eq!(role, ParticipantRole::Clinician);
}
