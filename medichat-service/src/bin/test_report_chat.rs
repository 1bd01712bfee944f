use anyhow::Result;
use futures::StreamExt;
use medichat_core::AnswerEvent;
use medichat_service::{ServiceConfig, create_app_state};
use std::env;
use std::io::Write;

const SAMPLE_REPORT: &str = "Complete Blood Count. Hemoglobin 10.2 g/dL (low, ref 13.5-17.5). \
MCV 72 fL (low, ref 80-100). Ferritin 8 ng/mL (low, ref 30-400). \
White cell count 6.1 x10^9/L (normal). Platelets 310 x10^9/L (normal).";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("Clinical Report -> Retrieval -> Streamed Answer");
    println!("===============================================");

    let args: Vec<String> = env::args().collect();
    if args.len() > 3 {
        eprintln!("Usage: {} [report_text_file] [question]", args[0]);
        std::process::exit(1);
    }

    let report = match args.get(1) {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => SAMPLE_REPORT.to_string(),
    };
    let question = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| "What could explain these results?".to_string());

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let state = create_app_state(&config);

    let scope = state.pipeline.scope();
    println!("Index: {}/{} (top {})", scope.collection, scope.namespace, scope.top_k);
    println!("Question: {}", question);
    println!();

    let mut answer = state.pipeline.answer(&report, &question).await?;
    while let Some(event) = answer.next().await {
        match event {
            AnswerEvent::Data(data) => {
                println!("Retrieved findings:");
                println!("───────────────────");
                println!("{}", data.retrievals);
                println!();
                println!("Answer:");
                println!("───────");
            }
            AnswerEvent::Text(text) => {
                print!("{}", text);
                std::io::stdout().flush()?;
            }
            AnswerEvent::Finish { reason, usage } => {
                println!();
                println!();
                println!("Finished: {:?} {:?}", reason, usage);
            }
            AnswerEvent::Error(e) => {
                println!();
                eprintln!("Stream error: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
