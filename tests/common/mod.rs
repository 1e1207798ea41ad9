//! Shared fixtures for integration tests

#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::Path;

pub const COURSE: &str = "spa_for_eng";

fn audio(id: &str) -> Value {
    json!({
        "known": format!("{}-known.mp3", id),
        "target_voice_1": format!("{}-t1.mp3", id),
        "target_voice_2": format!("{}-t2.mp3", id),
        "target_duration_ms": 1200
    })
}

fn phrase(id: &str, role: &str, words: u32, connected: &[String], position: &str) -> Value {
    json!({
        "id": id,
        "role": role,
        "known": format!("known {}", id),
        "target": format!("target {}", id),
        "word_count": words,
        "connected_lego_ids": connected,
        "lego_position": position,
        "audio": audio(id)
    })
}

/// `seeds` seeds with one atomic LEGO each; from seed 2 on, eternal phrases
/// pair the LEGO with the previous seed's LEGO
pub fn course_json(seeds: u32) -> Value {
    let seeds: Vec<Value> = (1..=seeds)
        .map(|n| {
            let id = format!("S{:04}L01", n);
            let mut phrases = vec![
                phrase(&format!("{}-p1", id), "practice", 2, &[id.clone()], "start"),
                phrase(&format!("{}-p2", id), "practice", 4, &[id.clone()], "end"),
            ];
            if n > 1 {
                let prev = format!("S{:04}L01", n - 1);
                for (i, position) in ["start", "middle", "end"].iter().enumerate() {
                    phrases.push(phrase(
                        &format!("{}-e{}", id, i + 1),
                        "eternal_eligible",
                        3 + i as u32,
                        &[prev.clone(), id.clone()],
                        position,
                    ));
                }
            }
            json!({
                "seed_number": n,
                "known": format!("sentence {}", n),
                "target": format!("frase {}", n),
                "legos": [{
                    "lego_index": 1,
                    "kind": "atomic",
                    "known": format!("word {}", n),
                    "target": format!("palabra {}", n),
                    "audio": audio(&id),
                    "phrases": phrases
                }]
            })
        })
        .collect();
    json!({ "course_code": COURSE, "seeds": seeds })
}

pub fn write_course(data_dir: &Path, seeds: u32) {
    write_course_value(data_dir, &course_json(seeds));
}

pub fn write_course_value(data_dir: &Path, course: &Value) {
    let courses = data_dir.join("courses");
    std::fs::create_dir_all(&courses).unwrap();
    std::fs::write(
        courses.join(format!("{}.json", COURSE)),
        serde_json::to_string_pretty(course).unwrap(),
    )
    .unwrap();
}

/// Strip a seed's only LEGO of its phrases and audio, leaving nothing playable
pub fn make_unplayable(course: &mut Value, seed_number: usize) {
    let lego = &mut course["seeds"][seed_number - 1]["legos"][0];
    lego["audio"] = json!({});
    lego["phrases"] = json!([]);
}
