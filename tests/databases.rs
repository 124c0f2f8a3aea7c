//! The sample databases shipped with the server load cleanly.

use std::path::PathBuf;

use trivia::game::{QuestionBank, UserStore};

fn database(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("databases").join(name)
}

#[test]
fn test_sample_users_load() {
    let users = UserStore::load(database("users.json")).unwrap();
    let ranking: Vec<&str> = users.ranking().iter().map(|u| u.username.as_str()).collect();
    assert_eq!(ranking, ["master", "yossi", "test"]);
}

#[test]
fn test_sample_questions_load() {
    let questions = QuestionBank::load(database("questions.json")).unwrap();
    assert!(questions.len() >= 2);
    assert_eq!(questions.get(4122).unwrap().correct_answer(), "Paris");
}
