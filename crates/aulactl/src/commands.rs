//! Command implementations for aulactl.

use anyhow::{Context, Result};
use aula_common::{AnswerSystem, ChatRequest, ChatResponse, IngestResponse, StatusResponse};
use owo_colors::OwoColorize;
use std::io::{self, BufRead, Write};
use uuid::Uuid;

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn send_question(
    addr: &str,
    question: &str,
    session: Option<Uuid>,
) -> Result<ChatResponse> {
    let request = ChatRequest {
        message: question.to_string(),
        session_id: session,
        user: None,
    };

    let response = client()
        .post(format!("{}/v1/chat", addr))
        .json(&request)
        .send()
        .await
        .context("Failed to reach the Aula daemon. Is aulad running?")?;

    if !response.status().is_success() {
        anyhow::bail!("Daemon returned {}", response.status());
    }

    response.json().await.context("Invalid daemon response")
}

fn print_answer(response: &ChatResponse) {
    println!("{}", response.answer);

    match response.system_used {
        AnswerSystem::Sql => {}
        AnswerSystem::Vector => {
            println!();
            println!(
                "{}",
                "(answered from the knowledge base fallback)".yellow()
            );
            if let Some(reason) = &response.fallback_reason {
                println!("{} {}", "reason:".dimmed(), reason.dimmed());
            }
        }
        AnswerSystem::Error => {
            if let Some(reason) = &response.fallback_reason {
                eprintln!("{} {}", "error:".red(), reason.dimmed());
            }
        }
    }
}

pub async fn ask(addr: &str, question: &str, session: Option<Uuid>) -> Result<()> {
    let response = send_question(addr, question, session).await?;
    print_answer(&response);
    println!();
    println!("{} {}", "session:".dimmed(), response.session_id.to_string().dimmed());
    Ok(())
}

pub async fn chat(addr: &str) -> Result<()> {
    println!("{}", "Aula interactive chat. Type 'exit' to leave.".bold());

    let stdin = io::stdin();
    let mut session: Option<Uuid> = None;

    loop {
        print!("{} ", ">".green().bold());
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        match send_question(addr, question, session).await {
            Ok(response) => {
                session = Some(response.session_id);
                print_answer(&response);
                println!();
            }
            Err(e) => eprintln!("{} {}", "error:".red(), e),
        }
    }

    Ok(())
}

pub async fn status(addr: &str) -> Result<()> {
    let response = client()
        .get(format!("{}/v1/status", addr))
        .send()
        .await
        .context("Failed to reach the Aula daemon. Is aulad running?")?;

    let status: StatusResponse = response.json().await.context("Invalid daemon response")?;

    let overall = match status.status.as_str() {
        "healthy" => status.status.green().to_string(),
        "degraded" => status.status.yellow().to_string(),
        _ => status.status.red().to_string(),
    };
    println!("{} {}", "status:".bold(), overall);
    println!("{} {}", "serving:".bold(), status.serving);

    print_component("database", &status.database);
    print_component("language model", &status.language_model);
    Ok(())
}

fn print_component(name: &str, health: &aula_common::ComponentHealth) {
    if health.available {
        println!("  {} {}", name, "ok".green());
    } else {
        let detail = health.error.as_deref().unwrap_or("unavailable");
        println!("  {} {} ({})", name, "down".red(), detail);
    }
}

pub async fn refresh_schema(addr: &str) -> Result<()> {
    let response = client()
        .post(format!("{}/v1/schema/refresh", addr))
        .send()
        .await
        .context("Failed to reach the Aula daemon. Is aulad running?")?;

    if response.status().is_success() {
        println!("{}", "Schema snapshot refreshed.".green());
        Ok(())
    } else {
        anyhow::bail!("Refresh failed: {}", response.text().await.unwrap_or_default())
    }
}

pub async fn ingest(addr: &str) -> Result<()> {
    println!("Running chunk ingestion (this may take a while)...");

    let response = client()
        .post(format!("{}/v1/admin/ingest", addr))
        .send()
        .await
        .context("Failed to reach the Aula daemon. Is aulad running?")?;

    if !response.status().is_success() {
        anyhow::bail!("Ingestion failed: {}", response.text().await.unwrap_or_default());
    }

    let stats: IngestResponse = response.json().await.context("Invalid daemon response")?;
    println!(
        "{} {} inserted, {} skipped as duplicates",
        "Done:".green(),
        stats.inserted,
        stats.skipped
    );
    Ok(())
}
