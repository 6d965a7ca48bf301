use adaptive_translator::{
    config::load_config,
    controller::TranslatorService,
    error::ApiError,
    output::{format_cache_stats, print_error, print_verbose},
    progressive::ProgressEvent,
    request::{TranslationMode, TranslationRequest},
};
use std::io::{IsTerminal, Read};
use std::sync::Arc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Read a request from stdin, supporting both JSON and plain text.
///
/// Plain text becomes a legacy-shaped request against `--target`.
fn read_request_from_stdin(target: &str) -> Option<TranslationRequest> {
    if std::io::stdin().is_terminal() {
        print_error("No input provided. Pipe text or a JSON request to this command:");
        eprintln!("  echo 'your text' | adaptive-translator --target ru");
        eprintln!("  echo '{{\"text\": \"...\", \"target_lang\": \"ru\"}}' | adaptive-translator");
        return None;
    }

    let mut input = String::new();
    if std::io::stdin().read_to_string(&mut input).is_err() {
        print_error("Failed to read stdin");
        return None;
    }
    let trimmed = input.trim();
    if trimmed.is_empty() {
        print_error("Empty input");
        return None;
    }

    // Try a full JSON request first, fall back to plain text
    match serde_json::from_str::<TranslationRequest>(trimmed) {
        Ok(request) => Some(request),
        Err(_) => Some(TranslationRequest::simple(trimmed, "auto", target)),
    }
}

fn flag_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn print_help() {
    println!(
        "adaptive-translator {VERSION}

Translate stdin through the adaptive translation core.

USAGE:
  echo 'text' | adaptive-translator [--target <code>] [--progressive]
  echo '{{\"text\": ..., \"target_lang\": ...}}' | adaptive-translator

OPTIONS:
  --target <code>       Target language for plain-text input (default: en)
  --progressive         Stream NDJSON progress events instead of one result
  --detect              Detect the language of stdin and print the code
  --languages [id]      List supported language codes
  --models              List configured backends and their status
  --load <id>           Warm up a backend ahead of traffic
  --unload <id>         Unload a backend
  --health              Print service health
  --metrics             Print the metrics snapshot
  --cache-stats         Print size-cache statistics
  --clear-cache         Drop all cached sizes and results
  --verbose, -v         Verbose diagnostics on stderr
  --version, -V         Print version
  --help, -h            This help"
    );
}

fn print_api_error(err: &adaptive_translator::TranslateError) {
    let api: ApiError = err.into();
    match serde_json::to_string(&api) {
        Ok(json) => println!("{json}"),
        Err(_) => print_error(&api.message),
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let verbose = args.iter().any(|s| s == "--verbose" || s == "-v");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if verbose { "debug" } else { "warn" })
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.get(1).map(String::as_str) {
        Some("--version" | "-V") => {
            println!("adaptive-translator {VERSION}");
            return;
        }
        Some("--help" | "-h") => {
            print_help();
            return;
        }
        _ => {}
    }

    let config = load_config();
    print_verbose(
        &format!("{} backends configured", config.backends.len()),
        verbose,
    );
    let service = Arc::new(TranslatorService::new(config));

    match args.get(1).map(String::as_str) {
        Some("--health") => {
            match serde_json::to_string(&service.health()) {
                Ok(json) => println!("{json}"),
                Err(e) => print_error(&e.to_string()),
            }
            return;
        }
        Some("--metrics") => {
            match serde_json::to_string_pretty(&service.metrics()) {
                Ok(json) => println!("{json}"),
                Err(e) => print_error(&e.to_string()),
            }
            return;
        }
        Some("--cache-stats") => {
            println!(
                "{}",
                format_cache_stats("size-cache", &service.size_cache_stats())
            );
            return;
        }
        Some("--clear-cache") => {
            service.clear_caches();
            println!("caches cleared");
            return;
        }
        Some("--models") => {
            match serde_json::to_string_pretty(&service.list_models()) {
                Ok(json) => println!("{json}"),
                Err(e) => print_error(&e.to_string()),
            }
            return;
        }
        Some("--languages") => {
            let backend_id = args.get(2).filter(|a| !a.starts_with("--")).cloned();
            match service.languages(backend_id.as_deref()) {
                Ok(codes) => println!("{}", codes.join(" ")),
                Err(e) => {
                    print_api_error(&e);
                    std::process::exit(1);
                }
            }
            return;
        }
        Some("--load") => {
            let Some(id) = args.get(2) else {
                print_error("--load requires a backend id");
                std::process::exit(2);
            };
            if let Err(e) = service.load_model(id).await {
                print_api_error(&e);
                std::process::exit(1);
            }
            println!("backend {id} ready");
            return;
        }
        Some("--unload") => {
            let Some(id) = args.get(2) else {
                print_error("--unload requires a backend id");
                std::process::exit(2);
            };
            if let Err(e) = service.unload_model(id).await {
                print_api_error(&e);
                std::process::exit(1);
            }
            println!("backend {id} unloaded");
            return;
        }
        Some("--detect") => {
            let mut input = String::new();
            if std::io::stdin().read_to_string(&mut input).is_err() {
                print_error("Failed to read stdin");
                std::process::exit(2);
            }
            match service.detect(input.trim()).await {
                Ok(code) => println!("{code}"),
                Err(e) => {
                    print_api_error(&e);
                    std::process::exit(1);
                }
            }
            return;
        }
        _ => {}
    }

    let target = flag_value(&args, "--target").unwrap_or_else(|| "en".into());
    let progressive = args.iter().any(|s| s == "--progressive");

    let Some(mut request) = read_request_from_stdin(&target) else {
        std::process::exit(2);
    };
    if progressive {
        request.mode = TranslationMode::Progressive;
    }

    if request.mode == TranslationMode::Progressive {
        let mut stream = service.translate_progressive(request);
        let mut failed = false;
        while let Some(event) = stream.next().await {
            if matches!(event, ProgressEvent::Failed { .. }) {
                failed = true;
            }
            println!("{}", event.to_ndjson());
        }
        if failed {
            std::process::exit(1);
        }
    } else {
        match service.translate(request).await {
            Ok(result) => match serde_json::to_string(&result) {
                Ok(json) => println!("{json}"),
                Err(e) => print_error(&e.to_string()),
            },
            Err(e) => {
                print_api_error(&e);
                std::process::exit(1);
            }
        }
    }
}
