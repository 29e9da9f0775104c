use std::sync::Arc;
use std::thread;

use scheduler_core::{
    Boefje, BoefjeTask, Filter, FilterRequest, ItemKind, PrioritizedItem, QueueError,
};
use scheduler_infrastructure::PriorityQueue;

fn boefje_item(boefje: &str, ooi: &str, priority: i64) -> PrioritizedItem {
    let task = BoefjeTask::new(Boefje::new(boefje), Some(ooi.to_string()), "org1");
    PrioritizedItem::from_task("boefje-org1", task.id, task.hash(), priority, &task).unwrap()
}

#[test]
fn test_concurrent_pushes_of_same_hash_keep_one_entry() {
    let queue = Arc::new(PriorityQueue::new("boefje-org1", ItemKind::Boefje, 100).with_replace(true));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for round in 0..25 {
                    let priority = (i * 25 + round) as i64;
                    queue.push(boefje_item("dns-records", "Hostname|internet|example.com", priority))
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(queue.qsize(), 1);
    let item = queue.pop(None).unwrap();
    assert!(queue.empty());
    assert!(!queue.is_item_on_queue_by_hash(item.hash.as_deref().unwrap()));
}

#[test]
fn test_concurrent_distinct_pushes_respect_maxsize() {
    let queue = Arc::new(PriorityQueue::new("boefje-org1", ItemKind::Boefje, 50));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut full = 0;
                for n in 0..25 {
                    let ooi = format!("Hostname|internet|host-{i}-{n}.example.com");
                    match queue.push(boefje_item("dns-records", &ooi, n)) {
                        Ok(_) => {}
                        Err(QueueError::QueueFull(_)) => full += 1,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
                full
            })
        })
        .collect();

    let rejected: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(queue.qsize(), 50);
    assert_eq!(rejected, 50);
}

#[test]
fn test_pop_order_with_filters() {
    let queue = PriorityQueue::new("boefje-org1", ItemKind::Boefje, 10);
    queue.push(boefje_item("nmap", "IPAddressV4|internet|1.1.1.1", 5)).unwrap();
    queue.push(boefje_item("dns-records", "Hostname|internet|a.example.com", 1)).unwrap();
    queue.push(boefje_item("nmap", "IPAddressV4|internet|8.8.8.8", 2)).unwrap();

    let filters = FilterRequest::all(vec![
        Filter::new("data", Some("boefje__id"), "==", serde_json::json!("nmap")).unwrap(),
    ]);

    let first = queue.pop(Some(&filters)).unwrap();
    assert_eq!(first.priority, 2);
    let second = queue.pop(Some(&filters)).unwrap();
    assert_eq!(second.priority, 5);
    assert!(matches!(queue.pop(Some(&filters)), Err(QueueError::QueueEmpty(_))));

    assert_eq!(queue.pop(None).unwrap().priority, 1);
}
