use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use text_vision_agent::agent::{Agent, AgentConfig};
use text_vision_agent::brain;
use text_vision_agent::config::{Provider, Settings};
use text_vision_agent::error::AgentError;
use text_vision_agent::hands::{ChromeDriver, ChromeOptions};
use text_vision_agent::operator::ConsoleOperator;
use text_vision_agent::session::BrowserSession;

const EXAMPLE_TASKS: &[&str] = &[
    "Find the cheapest wireless mouse on amazon.com and report its price",
    "Open news.ycombinator.com and list the top 5 story titles",
    "Search wikipedia.org for 'Rust (programming language)' and summarize the first paragraph",
];

#[derive(Parser, Debug)]
#[command(name = "agent")]
#[command(about = "Drive a browser from natural-language tasks using a text view of each page")]
#[command(version)]
struct Args {
    /// Run Chrome without a window
    #[arg(long)]
    headless: bool,

    /// Model name, overrides AI_MODEL
    #[arg(long)]
    model: Option<String>,

    /// anthropic or openai, overrides AI_PROVIDER
    #[arg(long)]
    provider: Option<Provider>,

    #[arg(long)]
    max_iterations: Option<usize>,

    /// Page snapshot budget in estimated tokens
    #[arg(long)]
    token_limit: Option<usize>,

    /// Skip the keyword check before clicks
    #[arg(long)]
    no_risk_gate: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Run a single task and exit instead of starting the prompt
    #[arg(short, long)]
    task: Option<String>,
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("text_vision_agent={fallback},agent={fallback},warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn apply_args(settings: &mut Settings, args: &Args) {
    if let Some(provider) = args.provider {
        settings.set_provider(provider, args.model.is_some());
    }
    if let Some(model) = &args.model {
        settings.model = model.clone();
    }
    if let Some(n) = args.max_iterations {
        settings.max_iterations = n;
    }
    if let Some(limit) = args.token_limit {
        settings.token_limit = limit;
    }
    if args.headless {
        settings.headless = true;
    }
    if args.no_risk_gate {
        settings.risk_gate = false;
    }
}

fn print_banner(settings: &Settings) {
    println!("\n🤖 Text Vision Agent");
    println!("   provider: {:?}  model: {}", settings.provider, settings.model);
    println!(
        "   iterations: {}  snapshot budget: {} tokens  risk gate: {}",
        settings.max_iterations,
        settings.token_limit,
        if settings.risk_gate { "on" } else { "off" }
    );
    println!("\nExample tasks:");
    for task in EXAMPLE_TASKS {
        println!("  • {task}");
    }
    println!("\nCommands: 'reset' clears the conversation, 'exit' quits.\n");
}

/// `None` on end of input.
fn read_task() -> Option<String> {
    print!("📝 Task: ");
    let _ = io::stdout().flush();
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

async fn run_one(agent: &mut Agent, session: &mut BrowserSession, task: &str) {
    match agent.run(session, task).await {
        Ok(result) => println!("\n✅ Result:\n{result}\n"),
        Err(AgentError::Cancelled(reason)) => {
            warn!(reason = %reason, "task cancelled");
            println!("\n⛔ Task cancelled ({reason}).\n");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = Settings::from_env()?;
    apply_args(&mut settings, &args);
    init_tracing(settings.debug_mode || args.verbose);

    let backend = brain::connect(&settings).context("model backend unavailable")?;

    let options = ChromeOptions {
        headless: settings.headless,
        user_data_dir: settings.user_data_dir.clone(),
        chrome_path: settings.chrome_path.clone(),
        attach_port: settings.debug_port,
    };
    info!(headless = options.headless, "launching browser");
    // Chrome startup blocks on the CDP handshake.
    let driver = tokio::task::spawn_blocking(move || ChromeDriver::launch(&options))
        .await
        .context("browser launch task panicked")??;
    let mut session = BrowserSession::new(Box::new(driver));
    info!("browser ready");

    let mut agent = Agent::new(
        backend,
        Box::new(ConsoleOperator::new()),
        AgentConfig {
            max_iterations: settings.max_iterations,
            token_limit: settings.token_limit,
            risk_gate: settings.risk_gate,
            screenshot_dir: settings.screenshot_dir.clone(),
        },
    );

    if let Some(task) = &args.task {
        run_one(&mut agent, &mut session, task).await;
    } else {
        print_banner(&settings);
        while let Some(task) = read_task() {
            match task.to_lowercase().as_str() {
                "" => continue,
                "exit" | "quit" | "q" => break,
                "reset" => {
                    agent.reset();
                    println!("🔄 Conversation cleared.\n");
                }
                _ => run_one(&mut agent, &mut session, &task).await,
            }
        }
    }

    info!("shutting down");
    session.shutdown();
    println!("👋 Goodbye!");
    Ok(())
}
