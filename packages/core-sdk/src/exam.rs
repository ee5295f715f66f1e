//! Exam preparation: question generation through a provider, parsing of
//! the model output, grading, a pausable countdown and results export.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{
    db::{LocalStorage, EXAM_STATE_KEY},
    llm::Dispatcher,
    models::{ChatMessage, Role},
    providers::ProviderId,
    telemetry,
};

pub const QUESTION_TYPE: &str = "multiple-choice";
const MIN_TIME_LIMIT_MINUTES: u32 = 5;
/// Options are answered by letter, A to Z.
const MAX_OPTIONS: usize = 26;
const OFFLINE_TOPICS: [&str; 3] = ["general", "algebra", "biology"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/**
 * \brief One multiple-choice question; `correct` indexes into `options`.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: u32,
    #[serde(rename = "type", default = "question_type")]
    pub kind: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct: usize,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub topic: String,
}

fn question_type() -> String {
    QUESTION_TYPE.to_string()
}

impl Question {
    /**
     * \brief Non-empty text, 2 to 26 options, and `correct` within them.
     */
    pub fn is_well_formed(&self) -> bool {
        !self.question.trim().is_empty()
            && (2..=MAX_OPTIONS).contains(&self.options.len())
            && self.correct < self.options.len()
    }
}

/**
 * \brief Answer letter for option `index`; `?` past Z.
 */
pub fn option_letter(index: usize) -> char {
    u8::try_from(index)
        .ok()
        .filter(|i| usize::from(*i) < MAX_OPTIONS)
        .map_or('?', |i| char::from(b'A' + i))
}

/**
 * \brief Body of `POST /api/exam-prep`.
 * \details `topics` may be a list or a single comma/semicolon/newline separated string.
 */
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRequest {
    pub exam_type: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default, deserialize_with = "deserialize_topics")]
    pub topics: Vec<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn deserialize_topics<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Topics {
        List(Vec<String>),
        Text(String),
    }
    Ok(match Option::<Topics>::deserialize(deserializer)? {
        Some(Topics::List(list)) => list
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        Some(Topics::Text(text)) => split_topics(&text),
        None => Vec::new(),
    })
}

/**
 * \brief Split free text into topics on commas, semicolons and newlines.
 */
pub fn split_topics(text: &str) -> Vec<String> {
    text.split([',', ';', '\n'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn question_count(topics: &[String]) -> usize {
    (topics.len() + 4).clamp(6, 10)
}

/**
 * \brief Chat messages asking a model for questions as a bare JSON array.
 */
pub fn build_prompt(req: &ExamRequest) -> Vec<ChatMessage> {
    let topics = if req.topics.is_empty() {
        "general review".to_string()
    } else {
        req.topics.join(", ")
    };
    let system = "You are an exam preparation assistant. You reply with valid JSON only, no prose and no markdown.";
    let user = format!(
        "Generate {count} {difficulty} multiple-choice questions for the {exam} exam covering: {topics}.\n\
         Respond with ONLY a JSON array. Each item must have: \
         \"id\" (number), \"question\" (string), \"options\" (array of 4 strings), \
         \"correct\" (0-based index of the correct option), \"explanation\" (string), \"topic\" (string).",
        count = question_count(&req.topics),
        difficulty = req.difficulty.as_str(),
        exam = req.exam_type.to_uppercase(),
        topics = topics,
    );
    vec![
        ChatMessage::new(Role::System, system),
        ChatMessage::new(Role::User, user),
    ]
}

/**
 * \brief Extract well-formed questions from raw model output.
 * \details Accepts a JSON array or an object with a `questions` array,
 *          optionally wrapped in code fences or prose. Invalid items are
 *          dropped; an empty result means the output was unusable.
 */
pub fn parse_questions(raw: &str, default_topic: &str) -> Vec<Question> {
    let Some(value) = extract_json(raw) else {
        return Vec::new();
    };
    let items = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("questions").and_then(Value::as_array) {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| normalise_question(item, i, default_topic))
        .collect()
}

fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = strip_fences(raw.trim());
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                    return Some(v);
                }
            }
        }
    }
    None
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn normalise_question(item: &Value, index: usize, default_topic: &str) -> Option<Question> {
    let question = item.get("question")?.as_str()?.trim();
    if question.is_empty() {
        return None;
    }
    let options: Vec<String> = item
        .get("options")?
        .as_array()?
        .iter()
        .map(|o| match o {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    if !(2..=MAX_OPTIONS).contains(&options.len()) {
        return None;
    }
    let correct = match item.get("correct")? {
        Value::Number(n) => n.as_u64()? as usize,
        Value::String(s) => letter_index(s)?,
        _ => return None,
    };
    if correct >= options.len() {
        return None;
    }
    let id = item
        .get("id")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(index as u32 + 1);
    let text_field = |name: &str| {
        item.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    };
    let topic = text_field("topic");
    Some(Question {
        id,
        kind: question_type(),
        question: question.to_string(),
        options,
        correct,
        explanation: text_field("explanation"),
        topic: if topic.is_empty() {
            default_topic.to_string()
        } else {
            topic
        },
    })
}

/// "B", "b)" or "2" style answers.
fn letter_index(s: &str) -> Option<usize> {
    let s = s.trim().trim_end_matches([')', '.']);
    if let Ok(n) = s.parse::<usize>() {
        return Some(n);
    }
    let mut chars = s.chars();
    let c = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() || !c.is_ascii_uppercase() {
        return None;
    }
    Some((c as u8 - b'A') as usize)
}

/**
 * \brief Synthetic stand-in when the model output is unusable.
 */
pub fn fallback_question(exam_type: &str) -> Question {
    Question {
        id: 1,
        kind: question_type(),
        question: format!(
            "Which study approach is most effective when preparing for the {} exam?",
            exam_type.to_uppercase()
        ),
        options: vec![
            "Re-reading notes the night before".to_string(),
            "Spaced practice with regular self-testing".to_string(),
            "Highlighting the textbook".to_string(),
            "Skipping timed practice tests".to_string(),
        ],
        correct: 1,
        explanation: "Spaced repetition combined with retrieval practice gives the most durable recall."
            .to_string(),
        topic: exam_type.to_string(),
    }
}

/**
 * \brief Deterministic arithmetic drill used when no server answer is available.
 * \details One question per slot, cycling through the topics (or a default
 *          pool), with operands and distractors scaled by difficulty and the
 *          options rotated by position.
 */
pub fn offline_questions(topics: &str, difficulty: Difficulty) -> Vec<Question> {
    let mut pool = split_topics(topics);
    if pool.is_empty() {
        pool = OFFLINE_TOPICS.iter().map(|t| t.to_string()).collect();
    }
    let count = question_count(&pool) as i64;

    (0..count)
        .map(|i| {
            let topic = &pool[i as usize % pool.len()];
            let (a, b) = match difficulty {
                Difficulty::Easy => (i + 2, i + 3),
                Difficulty::Medium => (i * 2 + 3, i * 2 + 5),
                Difficulty::Hard => (i * 3 + 5, i * 3 + 7),
            };
            let sum = a + b;
            let distractors = match difficulty {
                Difficulty::Easy => [sum + 1, sum - 1, sum + 3],
                Difficulty::Medium => [sum + 1, sum - 2, sum + 3],
                Difficulty::Hard => [sum + 2, sum - 2, sum + 5],
            };
            let mut options: Vec<String> = std::iter::once(sum)
                .chain(distractors)
                .map(|n| n.to_string())
                .collect();
            let shift = i as usize % options.len();
            options.rotate_left(shift);
            let correct = (options.len() - shift) % options.len();
            Question {
                id: i as u32 + 1,
                kind: question_type(),
                question: format!(
                    "({}) If a = {} and b = {}, what is a + b? [Topic: {}]",
                    difficulty.as_str().to_uppercase(),
                    a,
                    b,
                    topic
                ),
                options,
                correct,
                explanation: "Add the two integers: a + b.".to_string(),
                topic: topic.clone(),
            }
        })
        .collect()
}

/**
 * \brief Ask the provider for questions; never fails.
 * \details Without a key, or when the reply yields no usable question, the
 *          result is the single fallback question.
 */
pub async fn generate_questions(
    dispatcher: &Dispatcher,
    req: &ExamRequest,
    provider: ProviderId,
    model: &str,
    api_key: Option<&str>,
) -> Vec<Question> {
    let Some(api_key) = api_key.filter(|k| !k.trim().is_empty()) else {
        telemetry::log_event("exam", "no API key, using fallback question");
        return vec![fallback_question(&req.exam_type)];
    };
    let messages = build_prompt(req);
    let reply = dispatcher.send(provider, model, &messages, api_key).await;
    let questions = parse_questions(&reply.content, &req.exam_type);
    if questions.is_empty() {
        telemetry::log_error(
            "exam",
            &format!("unparseable questions from provider={} model={}", provider, model),
        );
        return vec![fallback_question(&req.exam_type)];
    }
    questions
}

/**
 * \brief Outcome of grading a set of answers.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExamScore {
    pub score: usize,
    pub total: usize,
    pub incorrect: Vec<usize>,
    /** \brief Whole percent, rounded. */
    pub accuracy: u32,
}

pub fn grade(questions: &[Question], answers: &[Option<usize>]) -> ExamScore {
    let mut score = 0;
    let mut incorrect = Vec::new();
    for (i, q) in questions.iter().enumerate() {
        if answers.get(i).copied().flatten() == Some(q.correct) {
            score += 1;
        } else {
            incorrect.push(i);
        }
    }
    let total = questions.len();
    let accuracy = ((score as f64 / total.max(1) as f64) * 100.0).round() as u32;
    ExamScore {
        score,
        total,
        incorrect,
        accuracy,
    }
}

/**
 * \brief Countdown state; `paused` gates decrements, it does not stop the ticker.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExamTimer {
    remaining_secs: u32,
    running: bool,
    paused: bool,
}

impl ExamTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, time_limit_minutes: u32) {
        self.remaining_secs = time_limit_minutes
            .max(MIN_TIME_LIMIT_MINUTES)
            .saturating_mul(60);
        self.running = true;
        self.paused = false;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /**
     * \brief Advance one second; returns true exactly when the countdown hits zero.
     */
    pub fn tick(&mut self) -> bool {
        if !self.running || self.paused {
            return false;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.running = false;
            return true;
        }
        false
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /** \brief `m:ss` */
    pub fn formatted(&self) -> String {
        format!("{}:{:02}", self.remaining_secs / 60, self.remaining_secs % 60)
    }
}

/**
 * \brief Drive `timer` from a single interval until it expires or stops.
 * \details Abort the handle to clear the interval early.
 */
pub fn spawn_countdown(
    timer: Arc<Mutex<ExamTimer>>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Ok(mut guard) = timer.lock() else {
                break;
            };
            let expired = guard.tick();
            if expired || !guard.is_running() {
                break;
            }
        }
    })
}

/**
 * \brief Downloadable summary of a finished exam.
 */
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResults {
    pub exam_type: String,
    pub difficulty: Difficulty,
    pub score: usize,
    pub total: usize,
    pub accuracy: u32,
    pub incorrect: Vec<usize>,
    pub questions: Vec<Question>,
    pub answers: Vec<Option<usize>>,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

impl ExamResults {
    pub fn new(
        exam_type: &str,
        difficulty: Difficulty,
        questions: Vec<Question>,
        answers: Vec<Option<usize>>,
        finished_at: OffsetDateTime,
    ) -> Self {
        let score = grade(&questions, &answers);
        Self {
            exam_type: exam_type.to_string(),
            difficulty,
            score: score.score,
            total: score.total,
            accuracy: score.accuracy,
            incorrect: score.incorrect,
            questions,
            answers,
            finished_at,
        }
    }

    /** \brief `exam-results-{examType}-{unix millis}.json` */
    pub fn file_name(&self) -> String {
        let millis = self.finished_at.unix_timestamp_nanos() / 1_000_000;
        format!("exam-results-{}-{}.json", self.exam_type, millis)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/**
 * \brief Exam-prep session state kept in local storage between runs.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamState {
    pub exam_type: String,
    #[serde(default)]
    pub study_material: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub time_limit: u32,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub answers: Vec<Option<usize>>,
}

impl ExamState {
    pub fn save(&self, storage: &LocalStorage) -> Result<()> {
        storage.set_item(EXAM_STATE_KEY, &serde_json::to_string(self)?)
    }

    /**
     * \brief Drop malformed questions with their answers; returns how many were dropped.
     * \details Answers are padded to the question count and out-of-range choices cleared.
     */
    pub fn retain_well_formed(&mut self) -> usize {
        self.answers.resize(self.questions.len(), None);
        let before = self.questions.len();
        let (questions, answers): (Vec<_>, Vec<_>) = std::mem::take(&mut self.questions)
            .into_iter()
            .zip(std::mem::take(&mut self.answers))
            .filter(|(q, _)| q.is_well_formed())
            .map(|(q, a)| {
                let a = a.filter(|c| *c < q.options.len());
                (q, a)
            })
            .unzip();
        self.questions = questions;
        self.answers = answers;
        before - self.questions.len()
    }

    /**
     * \brief Last saved state; unreadable blobs are treated as absent.
     */
    pub fn load(storage: &LocalStorage) -> Option<Self> {
        let raw = storage.get_item(EXAM_STATE_KEY).ok().flatten()?;
        serde_json::from_str(&raw).ok()
    }
}
