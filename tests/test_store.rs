use comet_mq::prelude::*;

fn envelope(id: u8, high_priority: bool) -> QueueMessage {
    let mut message = Message::queue("orders", vec![id]);
    let mut bytes = [0u8; 16];
    bytes[15] = id;
    message.id = Some(MessageId { bytes });
    message.high_priority = high_priority;
    QueueMessage::new(message, None)
}

fn payload_ids(messages: &[QueueMessage]) -> Vec<u8> {
    messages
        .iter()
        .map(|m| m.read_message(|frame| frame.payload[0]))
        .collect()
}

#[test]
fn fifo_within_class_and_priority_first() {
    let store = MessageStore::new();
    store.put(envelope(1, false));
    store.put(envelope(2, true));
    store.put(envelope(3, false));
    store.put(envelope(4, true));
    store.put(envelope(5, false));

    assert_eq!(store.count_all(), 5);
    assert_eq!(store.count_priority(), 2);
    assert_eq!(store.count_regular(), 3);

    let mut drained = Vec::new();
    while let Some(message) = store.get_next(true, false) {
        drained.push(message);
    }
    // priority messages precede regular, FIFO inside each class
    assert_eq!(payload_ids(&drained), vec![2, 4, 1, 3, 5]);
    assert!(store.is_empty());
}

#[test]
fn peek_does_not_dequeue() {
    let store = MessageStore::new();
    store.put(envelope(1, false));
    let first = store.get_next(false, false).unwrap();
    assert_eq!(first.read_message(|m| m.payload[0]), 1);
    assert_eq!(store.count_all(), 1);
    assert!(first.is_in_queue());
}

#[test]
fn put_front_reenters_at_class_head() {
    let store = MessageStore::new();
    store.put(envelope(1, false));
    store.put(envelope(2, false));

    let m1 = store.get_next(true, false).unwrap();
    assert_eq!(m1.read_message(|m| m.payload[0]), 1);

    // put back as priority: it must overtake the remaining regular message
    store.put_front(m1, true);
    let next = store.get_next(true, false).unwrap();
    assert_eq!(next.read_message(|m| m.payload[0]), 1);
    assert!(next.read_message(|m| m.high_priority));
    let last = store.get_next(true, false).unwrap();
    assert_eq!(last.read_message(|m| m.payload[0]), 2);
}

#[test]
fn put_front_keeps_relative_order_of_others() {
    let store = MessageStore::new();
    for id in 1..=4 {
        store.put(envelope(id, false));
    }
    let m1 = store.get_next(true, false).unwrap();
    store.put_front(m1, false);

    let mut drained = Vec::new();
    while let Some(message) = store.get_next(true, false) {
        drained.push(message);
    }
    assert_eq!(payload_ids(&drained), vec![1, 2, 3, 4]);
}

#[test]
fn from_end_reads_the_tail() {
    let store = MessageStore::new();
    for id in 1..=3 {
        store.put(envelope(id, false));
    }
    let last = store.get_next(true, true).unwrap();
    assert_eq!(last.read_message(|m| m.payload[0]), 3);
    let first = store.get_next(true, false).unwrap();
    assert_eq!(first.read_message(|m| m.payload[0]), 1);
}

#[test]
fn find_and_remove_scans_both_classes() {
    let store = MessageStore::new();
    store.put(envelope(1, false));
    store.put(envelope(2, true));
    store.put(envelope(3, false));

    let found = store
        .find_and_remove(|m| m.read_message(|frame| frame.payload[0]) == 3)
        .unwrap();
    assert_eq!(found.read_message(|m| m.payload[0]), 3);
    assert!(!found.is_in_queue());
    assert_eq!(store.count_all(), 2);
    assert!(store
        .find_and_remove(|m| m.read_message(|frame| frame.payload[0]) == 3)
        .is_none());
}

#[test]
fn find_all_does_not_mutate() {
    let store = MessageStore::new();
    store.put(envelope(1, false));
    store.put(envelope(2, true));
    let all = store.find_all(|_| true);
    assert_eq!(all.len(), 2);
    assert_eq!(store.count_all(), 2);
}

#[test]
fn clears_are_per_class() {
    let store = MessageStore::new();
    store.put(envelope(1, false));
    store.put(envelope(2, true));
    store.put(envelope(3, true));

    assert_eq!(store.clear_priority(), 2);
    assert_eq!(store.count_all(), 1);
    assert_eq!(store.clear_regular(), 1);
    assert!(store.is_empty());
}

#[test]
fn id_list_is_ordered() {
    let store = MessageStore::new();
    let first = envelope(1, true);
    let second = envelope(2, true);
    let first_id = first.id().unwrap();
    let second_id = second.id().unwrap();
    store.put(first);
    store.put(second);

    assert_eq!(store.get_message_id_list(true), vec![first_id, second_id]);
    assert!(store.get_message_id_list(false).is_empty());
}

/// Multiset property: everything put comes back out exactly once.
#[test]
fn drained_multiset_equals_put_multiset() {
    let store = MessageStore::new();
    let mut expected = Vec::new();
    for round in 0..20u8 {
        let high = round % 3 == 0;
        expected.push(round);
        store.put(envelope(round, high));
    }
    let mut drained = Vec::new();
    while let Some(message) = store.get_next(true, false) {
        drained.push(message.read_message(|m| m.payload[0]));
    }
    drained.sort_unstable();
    expected.sort_unstable();
    assert_eq!(drained, expected);
}
