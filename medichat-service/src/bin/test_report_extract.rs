use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use medichat_core::GeminiClient;
use medichat_service::{DataUrl, GeminiReportExtractor, ReportExtractor};
use std::env;

fn mime_for(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".pdf") {
        "application/pdf"
    } else if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("Clinical Report Upload -> Gemini -> Report Text");
    println!("===============================================");

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <report_file_path>", args[0]);
        eprintln!("Example: {} /path/to/blood_panel.jpg", args[0]);
        std::process::exit(1);
    }
    let path = &args[1];

    let Ok(api_key) = env::var("GEMINI_API_KEY") else {
        eprintln!("Please set GEMINI_API_KEY environment variable");
        std::process::exit(1);
    };

    let bytes = tokio::fs::read(path).await?;
    let mime = mime_for(path);
    println!("Report: {} ({}, {} bytes)", path, mime, bytes.len());
    println!();

    let upload = DataUrl::parse(&format!("data:{mime};base64,{}", STANDARD.encode(&bytes)))?;

    let mut client = GeminiClient::new(api_key);
    if let Ok(model) = env::var("GEMINI_MODEL") {
        client = client.with_model(model);
    }
    let extractor = GeminiReportExtractor::new(client);

    match extractor.extract(&upload).await {
        Ok(text) => {
            println!("Extracted {} characters", text.len());
            println!("──────────────────────────");
            println!("{}", text);
        }
        Err(e) => {
            eprintln!("Extraction failed: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
