//! Trivia Client
//!
//! Interactive terminal client: log in, then pick from the menu until
//! logout.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use trivia::network::{AnswerOutcome, ClientConfig, ClientError, TriviaClient};

const MENU: &str = "\
s   Get my score
h   Get high scores
p   Play a trivia question
l   Get logged users
q   Quit
";

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = ClientConfig::from_env();
    let mut client = TriviaClient::connect(config.server_addr)
        .await
        .with_context(|| format!("Failed to connect to {}", config.server_addr))?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    login(&mut client, &mut input).await?;

    loop {
        let choice = prompt(&mut input, &format!("{}Please enter your choice: ", MENU)).await?;
        match choice.as_str() {
            "s" => println!("Your score is: {}", client.my_score().await?),
            "h" => println!("High scores:\n{}", client.highscore().await?),
            "l" => println!("Logged users:\n{}", client.logged_users().await?.join(", ")),
            "p" => {
                if !play_question(&mut client, &mut input).await? {
                    break;
                }
            }
            "q" => break,
            other => println!("Unknown choice {:?}", other),
        }
    }

    client.logout().await?;
    println!("Goodbye!");
    Ok(())
}

async fn prompt(input: &mut Input, text: &str) -> Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await?;
    let line = input.next_line().await?.context("stdin closed")?;
    Ok(line.trim().to_string())
}

async fn login(client: &mut TriviaClient, input: &mut Input) -> Result<()> {
    loop {
        let username = prompt(input, "Please enter username: ").await?;
        let password = prompt(input, "Please enter password: ").await?;
        match client.login(&username, &password).await {
            Ok(()) => {
                println!("Logged in!");
                return Ok(());
            }
            Err(ClientError::Server(text)) => println!("{}", text),
            Err(ClientError::Codec(e)) => println!("Invalid input: {}", e),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Returns false when no questions are left.
async fn play_question(client: &mut TriviaClient, input: &mut Input) -> Result<bool> {
    let Some(question) = client.get_question().await? else {
        println!("No more questions! GAME OVER!!!");
        return Ok(false);
    };

    println!("Your question:\n{}", question.text);
    for (i, answer) in question.answers.iter().enumerate() {
        println!("\t{}. {}", i + 1, answer);
    }

    let answer = prompt(input, "What do you think is the right answer [1-4]? ").await?;
    match client.send_answer(&question.id, &answer).await {
        Ok(AnswerOutcome::Correct) => println!("You are right!"),
        Ok(AnswerOutcome::Wrong { correct }) => {
            println!("You are wrong! The correct answer is #{}", correct)
        }
        Err(ClientError::Server(text)) => println!("{}", text),
        Err(ClientError::Codec(e)) => {
            warn!("Answer rejected locally: {}", e);
            println!("Invalid answer");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(true)
}
