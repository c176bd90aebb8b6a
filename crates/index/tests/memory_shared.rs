use std::sync::Arc;
use std::thread;

use serde_json::{json, Map};
use tabrag_index::{point_id, Filter, MemoryIndex, Point, VectorIndex};

fn point(bot: &str, chunk: &str, vector: Vec<f32>) -> Point {
    let mut payload = Map::new();
    payload.insert("bot_id".into(), json!(bot));
    payload.insert("chunk_id".into(), json!(chunk));
    Point {
        id: point_id(bot, chunk).to_string(),
        vector,
        payload,
    }
}

#[test]
fn concurrent_writers_share_one_collection() {
    let index: Arc<dyn VectorIndex> = Arc::new(MemoryIndex::new());
    index.create_collection("admisiones", 2).unwrap();
    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                let points = (0..25)
                    .map(|i| point("b", &format!("{worker}-{i}"), vec![1.0, i as f32]))
                    .collect();
                index.upsert("admisiones", points).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(index.count("admisiones").unwrap(), 100);
}

#[test]
fn reupserting_the_same_chunk_does_not_duplicate() {
    let index = MemoryIndex::new();
    index.create_collection("admisiones", 2).unwrap();
    index.upsert("admisiones", vec![point("b", "c1", vec![1.0, 0.0])]).unwrap();
    index.upsert("admisiones", vec![point("b", "c1", vec![1.0, 0.0])]).unwrap();
    index.upsert("admisiones", vec![point("other", "c1", vec![1.0, 0.0])]).unwrap();
    assert_eq!(index.count("admisiones").unwrap(), 2);
    let hits = index
        .search("admisiones", &[1.0, 0.0], &Filter::new().equals("bot_id", "b"), 10)
        .unwrap();
    assert_eq!(hits.len(), 1);
}
