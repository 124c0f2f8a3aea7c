//! Question Bank
//!
//! Multiple-choice questions keyed by id. Loaded once at startup from a JSON
//! file or the Open Trivia DB, then read-only.
//!
//! Every question is checked on load so it can always be sent as a
//! `YOUR_QUESTION` payload: four answers, a correct index in `1..=4`, and no
//! `#` or `|` in any text.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::StoreError;
use crate::core::rng::DeterministicRng;
use crate::network::protocol::{DATA_DELIMITER, DELIMITER};

/// Question identifier.
pub type QuestionId = u32;

/// Answers per question.
pub const ANSWER_COUNT: usize = 4;

/// Default Open Trivia DB endpoint.
pub const OPEN_TRIVIA_URL: &str = "https://opentdb.com/api.php?amount=50&type=multiple";

// =============================================================================
// QUESTION
// =============================================================================

/// A multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Unique id.
    pub id: QuestionId,
    /// Question text.
    pub text: String,
    /// The four answers, in display order.
    pub answers: [String; ANSWER_COUNT],
    /// 1-based index of the right answer.
    pub correct: u8,
}

/// On-disk shape of a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QuestionRecord {
    id: QuestionId,
    question: String,
    answers: Vec<String>,
    correct: u8,
}

impl Question {
    /// Build and check a question.
    pub fn new(
        id: QuestionId,
        text: impl Into<String>,
        answers: Vec<String>,
        correct: u8,
    ) -> Result<Self, StoreError> {
        let invalid = |reason: &str| StoreError::InvalidQuestion {
            id,
            reason: reason.to_string(),
        };

        let found = answers.len();
        let answers: [String; ANSWER_COUNT] = answers
            .try_into()
            .map_err(|_| invalid(&format!("expected {} answers, found {}", ANSWER_COUNT, found)))?;

        if !(1..=ANSWER_COUNT as u8).contains(&correct) {
            return Err(invalid(&format!("correct index {} out of range", correct)));
        }

        let text = text.into();
        let reserved = |s: &str| s.contains(DATA_DELIMITER) || s.contains(DELIMITER);
        if reserved(text.as_str()) || answers.iter().any(|a| reserved(a.as_str())) {
            return Err(invalid("text contains a reserved delimiter"));
        }

        Ok(Self {
            id,
            text,
            answers,
            correct,
        })
    }

    /// Text of the right answer.
    pub fn correct_answer(&self) -> &str {
        &self.answers[usize::from(self.correct) - 1]
    }
}

// =============================================================================
// QUESTION BANK
// =============================================================================

/// All questions, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    questions: BTreeMap<QuestionId, Question>,
}

impl QuestionBank {
    /// Empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from questions. Ids must be unique.
    pub fn from_questions(questions: impl IntoIterator<Item = Question>) -> Result<Self, StoreError> {
        let mut bank = Self::new();
        for question in questions {
            let id = question.id;
            if bank.questions.insert(id, question).is_some() {
                return Err(StoreError::DuplicateQuestion(id));
            }
        }
        Ok(bank)
    }

    /// Parse the JSON question file format:
    /// `[{"id": 1, "question": "...", "answers": ["a", "b", "c", "d"], "correct": 2}]`.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let records: Vec<QuestionRecord> = serde_json::from_str(json)?;
        let questions = records
            .into_iter()
            .map(|r| Question::new(r.id, r.question, r.answers, r.correct))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_questions(questions)
    }

    /// Load the JSON question file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let bank = Self::from_json(&json)?;
        info!("Loaded {} questions from {}", bank.len(), path.display());
        Ok(bank)
    }

    /// Every question by id.
    pub fn all(&self) -> &BTreeMap<QuestionId, Question> {
        &self.questions
    }

    /// One question.
    pub fn get(&self, id: QuestionId) -> Option<&Question> {
        self.questions.get(&id)
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = QuestionId> + '_ {
        self.questions.keys().copied()
    }

    /// Number of questions.
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// True when the bank holds no questions.
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

// =============================================================================
// OPEN TRIVIA DB
// =============================================================================

#[derive(Debug, Deserialize)]
struct OpenTriviaResponse {
    response_code: u32,
    #[serde(default)]
    results: Vec<OpenTriviaQuestion>,
}

#[derive(Debug, Deserialize)]
struct OpenTriviaQuestion {
    question: String,
    correct_answer: String,
    incorrect_answers: Vec<String>,
}

fn clean_web_text(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace([DATA_DELIMITER, DELIMITER], "")
}

/// Convert an Open Trivia DB response body into a bank.
///
/// Answers are shuffled with `rng`. Entities other than `&quot;` are not
/// decoded; questions still containing `&` are dropped. Ids run from 1 in
/// response order.
pub fn parse_open_trivia(json: &str, rng: &mut DeterministicRng) -> Result<QuestionBank, StoreError> {
    let response: OpenTriviaResponse = serde_json::from_str(json)?;
    if response.response_code != 0 {
        return Err(StoreError::Api(response.response_code));
    }

    let mut questions = Vec::with_capacity(response.results.len());
    for entry in response.results {
        let mut answers = Vec::with_capacity(ANSWER_COUNT);
        answers.push(entry.correct_answer.clone());
        answers.extend(entry.incorrect_answers);
        rng.shuffle(answers.as_mut_slice());

        let text = clean_web_text(&entry.question);
        let answers: Vec<String> = answers.iter().map(|a| clean_web_text(a)).collect();
        let correct_answer = clean_web_text(&entry.correct_answer);

        if text.contains('&') || answers.iter().any(|a| a.contains('&')) {
            debug!("Skipping web question with unescaped entity: {}", text);
            continue;
        }
        if answers.len() != ANSWER_COUNT {
            debug!("Skipping web question with {} answers", answers.len());
            continue;
        }
        let Some(position) = answers.iter().position(|a| *a == correct_answer) else {
            continue;
        };

        let id = questions.len() as QuestionId + 1;
        questions.push(Question::new(id, text, answers, position as u8 + 1)?);
    }

    QuestionBank::from_questions(questions)
}

/// Fetch questions from the Open Trivia DB.
pub async fn fetch_open_trivia(
    url: &str,
    rng: &mut DeterministicRng,
) -> Result<QuestionBank, StoreError> {
    info!("Fetching questions from {}", url);
    let body = reqwest::get(url).await?.error_for_status()?.text().await?;
    let bank = parse_open_trivia(&body, rng)?;
    info!("Loaded {} web questions", bank.len());
    Ok(bank)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(list: [&str; 4]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_question_valid() {
        let q = Question::new(2313, "How much is 2+2", answers(["3", "4", "2", "1"]), 2).unwrap();
        assert_eq!(q.correct_answer(), "4");
    }

    #[test]
    fn test_question_rejects_bad_shape() {
        let two = vec!["1".to_string(), "2".to_string()];
        assert!(matches!(
            Question::new(1, "What is 1+1?", two, 2),
            Err(StoreError::InvalidQuestion { id: 1, .. })
        ));
        assert!(Question::new(1, "q", answers(["a", "b", "c", "d"]), 0).is_err());
        assert!(Question::new(1, "q", answers(["a", "b", "c", "d"]), 5).is_err());
        assert!(Question::new(1, "q#", answers(["a", "b", "c", "d"]), 1).is_err());
        assert!(Question::new(1, "q", answers(["a", "b|", "c", "d"]), 1).is_err());
    }

    #[test]
    fn test_bank_from_json() {
        let json = r#"[
            {"id": 2313, "question": "How much is 2+2", "answers": ["3", "4", "2", "1"], "correct": 2},
            {"id": 4122, "question": "What is the capital of France?",
             "answers": ["Lion", "Marseille", "Paris", "Montpellier"], "correct": 3}
        ]"#;
        let bank = QuestionBank::from_json(json).unwrap();
        assert_eq!(bank.len(), 2);
        assert_eq!(bank.ids().collect::<Vec<_>>(), vec![2313, 4122]);
        assert_eq!(bank.get(4122).unwrap().correct_answer(), "Paris");
        assert!(bank.all().contains_key(&2313));
    }

    #[test]
    fn test_bank_rejects_duplicates() {
        let q = Question::new(7, "q", answers(["a", "b", "c", "d"]), 1).unwrap();
        assert!(matches!(
            QuestionBank::from_questions([q.clone(), q]),
            Err(StoreError::DuplicateQuestion(7))
        ));
    }

    #[test]
    fn test_bank_invalid_json() {
        assert!(matches!(QuestionBank::from_json("{"), Err(StoreError::Json(_))));
        assert!(QuestionBank::from_json("[]").unwrap().is_empty());
    }

    const WEB_JSON: &str = r#"{
        "response_code": 0,
        "results": [
            {"type": "multiple", "difficulty": "easy", "category": "General",
             "question": "What is &quot;H2O&quot;?",
             "correct_answer": "Water", "incorrect_answers": ["Fire", "Air", "Earth"]},
            {"type": "multiple", "difficulty": "easy", "category": "General",
             "question": "Who&#039;s there?",
             "correct_answer": "Me", "incorrect_answers": ["You", "Them", "Us"]},
            {"type": "multiple", "difficulty": "hard", "category": "Science",
             "question": "Element #1?",
             "correct_answer": "Hydrogen", "incorrect_answers": ["Helium", "Lithium", "Oxygen"]}
        ]
    }"#;

    #[test]
    fn test_parse_open_trivia() {
        let mut rng = DeterministicRng::new(42);
        let bank = parse_open_trivia(WEB_JSON, &mut rng).unwrap();

        // The entity-bearing question is dropped; ids stay dense.
        assert_eq!(bank.len(), 2);
        let first = bank.get(1).unwrap();
        assert_eq!(first.text, "What is \"H2O\"?");
        assert_eq!(first.correct_answer(), "Water");

        let second = bank.get(2).unwrap();
        assert_eq!(second.text, "Element 1?");
        assert_eq!(second.correct_answer(), "Hydrogen");
    }

    #[test]
    fn test_parse_open_trivia_is_seeded() {
        let a = parse_open_trivia(WEB_JSON, &mut DeterministicRng::new(7)).unwrap();
        let b = parse_open_trivia(WEB_JSON, &mut DeterministicRng::new(7)).unwrap();
        assert_eq!(a.get(1), b.get(1));
    }

    #[test]
    fn test_parse_open_trivia_api_error() {
        let mut rng = DeterministicRng::new(1);
        assert!(matches!(
            parse_open_trivia(r#"{"response_code": 1, "results": []}"#, &mut rng),
            Err(StoreError::Api(1))
        ));
    }
}
