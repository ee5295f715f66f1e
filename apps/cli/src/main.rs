use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use time::OffsetDateTime;

use ultimate_ai_core_sdk::{
    config::ServerConfig,
    conversation::Conversation,
    credentials::CredentialStore,
    db::LocalStorage,
    exam::{self, Difficulty, ExamResults, ExamState, ExamTimer, Question},
    llm::Dispatcher,
    providers::{validate_api_key, ProviderId},
    server, telemetry,
};

/**
 * \brief Terminal front end for the study assistant.
 */
#[derive(Parser, Debug)]
#[command(name = "ultimate-ai", version, about = "Multi-provider AI study assistant")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /** \brief List supported providers and whether a key is stored. */
    Providers,

    /** \brief Manage stored API keys. */
    Keys {
        #[command(subcommand)]
        action: KeyAction,
    },

    /** \brief Choose the provider used by `chat` and `exam`. */
    Select { provider: ProviderId },

    /**
     * \brief Chat with the selected provider; interactive when no prompt is given.
     */
    Chat {
        #[arg(long)]
        provider: Option<ProviderId>,
        #[arg(long)]
        model: Option<String>,
        /// Pick the model from each prompt's keywords
        #[arg(long, default_value_t = false)]
        auto_model: bool,
        #[arg(long)]
        prompt: Option<String>,
    },

    /**
     * \brief Timed practice exam generated through a running server.
     */
    Exam {
        #[arg(long, default_value = "http://127.0.0.1:5173")]
        server: String,
        #[arg(long, default_value = "sat")]
        exam_type: String,
        #[arg(long, value_enum, default_value_t = Level::Medium)]
        difficulty: Level,
        /// Comma, semicolon or newline separated
        #[arg(long, default_value = "")]
        topics: String,
        /// Minutes; anything below 5 is raised to 5
        #[arg(long, default_value_t = 30)]
        time_limit: u32,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Continue the last saved exam instead of generating a new one
        #[arg(long, default_value_t = false)]
        resume: bool,
    },

    /** \brief Start the local HTTP server and static client. */
    Serve {
        #[arg(long)]
        addr: Option<String>,
    },

    /** \brief Turn local diagnostics logging on or off. */
    Telemetry {
        #[arg(value_enum)]
        state: Toggle,
    },
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /** \brief Validate, encrypt and store a key; read from stdin when omitted. */
    Set {
        provider: ProviderId,
        key: Option<String>,
    },
    Remove {
        provider: ProviderId,
    },
    /** \brief Remove every key and the provider selection. */
    Clear,
    Status,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Level {
    Easy,
    Medium,
    Hard,
}

impl From<Level> for Difficulty {
    fn from(level: Level) -> Self {
        match level {
            Level::Easy => Difficulty::Easy,
            Level::Medium => Difficulty::Medium,
            Level::Hard => Difficulty::Hard,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let storage = LocalStorage::open_default().context("open local storage failed")?;
    telemetry::set_enabled(storage.telemetry_enabled().unwrap_or(false));
    if !storage.welcome_seen().unwrap_or(true) {
        print_welcome();
        storage
            .mark_welcome_seen()
            .context("save welcome flag failed")?;
    }
    let mut credentials = CredentialStore::load(storage);

    match cli.command {
        Commands::Providers => print_providers(&credentials),
        Commands::Keys { action } => run_keys(&mut credentials, action)?,
        Commands::Select { provider } => {
            credentials
                .select_provider(provider)
                .context("save provider selection failed")?;
            println!("Selected {}", provider.info().display_name);
            if !credentials.has_valid_key(provider) {
                println!("No key stored yet, run: ultimate-ai keys set {}", provider);
            }
        }
        Commands::Chat {
            provider,
            model,
            auto_model,
            prompt,
        } => {
            let provider = provider.unwrap_or_else(|| credentials.selected_provider());
            let mut conversation = Conversation::new(provider).with_auto_model(auto_model);
            if let Some(model) = model {
                conversation = conversation.with_model(model);
            }
            run_chat(&mut conversation, &credentials, prompt).await?;
        }
        Commands::Exam {
            server,
            exam_type,
            difficulty,
            topics,
            time_limit,
            out_dir,
            resume,
        } => {
            let state = if resume {
                ExamState::load(credentials.storage()).context("no saved exam to resume")?
            } else {
                let questions = fetch_questions(
                    &server,
                    &credentials,
                    &exam_type,
                    difficulty.into(),
                    &topics,
                )
                .await;
                let answers = vec![None; questions.len()];
                ExamState {
                    exam_type,
                    study_material: topics,
                    difficulty: difficulty.into(),
                    time_limit,
                    questions,
                    answers,
                }
            };
            run_exam(state, &credentials, &out_dir).await?;
        }
        Commands::Serve { addr } => {
            let mut config = ServerConfig::from_env().context("read server config failed")?;
            if let Some(addr) = addr {
                config.addr = addr;
            }
            server::run(config).await?;
        }
        Commands::Telemetry { state } => {
            let enabled = matches!(state, Toggle::On);
            credentials
                .storage()
                .set_telemetry_enabled(enabled)
                .context("save telemetry flag failed")?;
            telemetry::set_enabled(enabled);
            println!("Telemetry {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    Ok(())
}

fn print_welcome() {
    println!("Welcome to Ultimate AI.");
    println!("Add a key for any supported provider to get started, for example:");
    println!("  ultimate-ai keys set groq gsk_...");
    println!("Keys are stored locally in obfuscated form only.\n");
}

fn print_providers(credentials: &CredentialStore) {
    let selected = credentials.selected_provider();
    for provider in ProviderId::ALL {
        let info = provider.info();
        println!(
            "{} {:<11} {}{}  key: {}  [{}]",
            if provider == selected { "*" } else { " " },
            info.name,
            info.display_name,
            if info.free_available { " (free tier)" } else { "" },
            info.api_key_format,
            if credentials.has_valid_key(provider) {
                "stored"
            } else {
                "missing"
            }
        );
        println!("    {}", info.description);
        println!("    models: {}", info.models.join(", "));
    }
}

fn read_line(prompt: &str) -> Result<Option<String>> {
    print!("{}", prompt);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    let read = std::io::stdin()
        .read_line(&mut line)
        .context("read stdin failed")?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn run_keys(credentials: &mut CredentialStore, action: KeyAction) -> Result<()> {
    match action {
        KeyAction::Set { provider, key } => {
            let key = match key {
                Some(k) => k,
                None => read_line(&format!(
                    "{} API key ({}): ",
                    provider.info().display_name,
                    provider.info().api_key_format
                ))?
                .unwrap_or_default(),
            };
            if !validate_api_key(provider, &key) {
                bail!(
                    "invalid {} key, expected format {}",
                    provider,
                    provider.info().api_key_format
                );
            }
            if !credentials.store(provider, &key) {
                bail!("saving the {} key failed", provider);
            }
            println!("Stored {} key", provider.info().display_name);
        }
        KeyAction::Remove { provider } => {
            credentials
                .remove(provider)
                .context("remove key failed")?;
            println!("Removed {} key", provider);
        }
        KeyAction::Clear => {
            credentials.clear_all().context("clear keys failed")?;
            println!("All keys removed");
        }
        KeyAction::Status => {
            for record in credentials.records() {
                println!(
                    "{:<11} valid={} last validated {}",
                    record.provider, record.is_valid, record.last_validated
                );
            }
            println!("selected: {}", credentials.selected_provider());
        }
    }
    Ok(())
}

async fn run_chat(
    conversation: &mut Conversation,
    credentials: &CredentialStore,
    prompt: Option<String>,
) -> Result<()> {
    let dispatcher = Dispatcher::new();
    if let Some(prompt) = prompt {
        let response = conversation.send(&dispatcher, credentials, &prompt).await?;
        println!("{}", response.content);
        return Ok(());
    }

    println!(
        "Chatting with {} ({}). /clear resets history, /exit quits.",
        conversation.provider().info().display_name,
        conversation.model()
    );
    while let Some(line) = read_line("> ")? {
        match line.as_str() {
            "/exit" | "/quit" => break,
            "/clear" => {
                conversation.clear();
                continue;
            }
            _ => {}
        }
        match conversation.send(&dispatcher, credentials, &line).await {
            Ok(response) => {
                println!("[{}] {}\n", response.model, response.content);
            }
            Err(e) => eprintln!("{}", e),
        }
    }
    Ok(())
}

/**
 * \brief Questions from the exam server, or the offline set when it cannot supply any.
 */
async fn fetch_questions(
    server: &str,
    credentials: &CredentialStore,
    exam_type: &str,
    difficulty: Difficulty,
    topics: &str,
) -> Vec<Question> {
    match request_questions(server, credentials, exam_type, difficulty, topics).await {
        Ok(questions) => questions,
        Err(err) => {
            telemetry::log_error("cli.exam", &format!("{:#}", err));
            eprintln!("{:#}; using offline practice questions", err);
            exam::offline_questions(topics, difficulty)
        }
    }
}

async fn request_questions(
    server: &str,
    credentials: &CredentialStore,
    exam_type: &str,
    difficulty: Difficulty,
    topics: &str,
) -> Result<Vec<Question>> {
    let provider = credentials.selected_provider();
    let body = json!({
        "examType": exam_type,
        "difficulty": difficulty,
        "topics": exam::split_topics(topics),
        "provider": provider,
        "apiKey": credentials.get_decrypted(provider),
    });
    let resp = reqwest::Client::new()
        .post(format!("{}/api/exam-prep", server.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .with_context(|| format!("exam server unreachable at {}", server))?;
    if !resp.status().is_success() {
        bail!("exam server returned {}", resp.status());
    }
    let mut value: Value = resp.json().await.context("invalid exam response")?;
    let mut questions: Vec<Question> = serde_json::from_value(value["questions"].take())
        .context("invalid questions in exam response")?;
    questions.retain(Question::is_well_formed);
    if questions.is_empty() {
        bail!("exam server returned no questions");
    }
    Ok(questions)
}

/**
 * \brief Stdin lines, read on a plain thread.
 */
fn stdin_lines() -> tokio::sync::mpsc::Receiver<String> {
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn run_exam(
    mut state: ExamState,
    credentials: &CredentialStore,
    out_dir: &Path,
) -> Result<()> {
    let dropped = state.retain_well_formed();
    if dropped > 0 {
        eprintln!("Skipping {} malformed question(s)", dropped);
    }
    if state.questions.is_empty() {
        bail!("no usable questions in this exam");
    }
    state
        .save(credentials.storage())
        .context("save exam state failed")?;

    let timer = Arc::new(Mutex::new(ExamTimer::new()));
    if let Ok(mut t) = timer.lock() {
        t.start(state.time_limit);
        println!(
            "{} exam, {} questions, {} on the clock. Answer with a letter; p pauses, q ends.",
            state.exam_type.to_uppercase(),
            state.questions.len(),
            t.formatted()
        );
    }
    let mut countdown = exam::spawn_countdown(timer.clone(), Duration::from_secs(1));
    let mut lines = stdin_lines();

    let mut index = state.answers.iter().position(Option::is_none);
    'exam: while let Some(i) = index {
        let q = &state.questions[i];
        println!("\n{}. {}", i + 1, q.question);
        for (n, option) in q.options.iter().enumerate() {
            println!("   {}) {}", exam::option_letter(n), option);
        }
        loop {
            let remaining = timer.lock().map(|t| t.formatted()).unwrap_or_default();
            print!("[{}] answer: ", remaining);
            std::io::stdout().flush().ok();
            let line = tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => line,
                    None => break 'exam,
                },
                _ = &mut countdown => {
                    println!("\nTime is up.");
                    break 'exam;
                }
            };
            let line = line.trim().to_ascii_uppercase();
            match line.as_str() {
                "Q" => break 'exam,
                "P" => {
                    if let Ok(mut t) = timer.lock() {
                        let paused = !t.is_paused();
                        t.set_paused(paused);
                        println!("{}", if paused { "Paused" } else { "Resumed" });
                    }
                }
                _ => {
                    let choice = line
                        .chars()
                        .next()
                        .filter(|c| c.is_ascii_uppercase())
                        .map(|c| (c as u8 - b'A') as usize)
                        .filter(|c| *c < q.options.len());
                    match choice {
                        Some(c) => {
                            state.answers[i] = Some(c);
                            state
                                .save(credentials.storage())
                                .context("save exam state failed")?;
                            break;
                        }
                        None => println!(
                            "Pick one of A-{}",
                            exam::option_letter(q.options.len() - 1)
                        ),
                    }
                }
            }
        }
        index = state.answers.iter().position(Option::is_none);
    }
    countdown.abort();

    let results = ExamResults::new(
        &state.exam_type,
        state.difficulty,
        state.questions.clone(),
        state.answers.clone(),
        OffsetDateTime::now_utc(),
    );
    println!(
        "\nScore: {}/{} ({}%)",
        results.score, results.total, results.accuracy
    );
    for &i in &results.incorrect {
        let q = &results.questions[i];
        println!(
            "  {}. correct answer {}) {}{}",
            i + 1,
            exam::option_letter(q.correct),
            q.options[q.correct],
            if q.explanation.is_empty() {
                String::new()
            } else {
                format!(" - {}", q.explanation)
            }
        );
    }

    std::fs::create_dir_all(out_dir).context("create output directory failed")?;
    let path = out_dir.join(results.file_name());
    std::fs::write(&path, results.to_json()?)
        .with_context(|| format!("write {} failed", path.display()))?;
    println!("Results saved to {}", path.display());
    telemetry::log_event(
        "cli.exam",
        &format!(
            "exam={} score={}/{}",
            results.exam_type, results.score, results.total
        ),
    );
    Ok(())
}
