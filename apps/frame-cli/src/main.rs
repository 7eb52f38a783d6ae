use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use device_registry::{self as devreg, Dictionary};
use frame_codec::{self as codec, CommandRequest};
use std::fs;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(
    name = "fl",
    version,
    about = "Fieldlink device frame tool",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a frame (hex, whitespace allowed) against a dictionary file
    Decode {
        /// Dictionary file (YAML or JSON)
        #[arg(long)]
        dict: String,
        /// Frame bytes as hex; several arguments are concatenated
        #[arg(required = true)]
        hex: Vec<String>,
    },
    /// Encode a command request into a frame
    Encode {
        /// Dictionary file (YAML or JSON)
        #[arg(long)]
        dict: String,
        /// Request JSON: {"command": NAME, "payload": [{"type": T, "value": V}]}
        #[arg(long, conflicts_with = "request_file")]
        request: Option<String>,
        /// Read the request JSON from a file instead
        #[arg(long)]
        request_file: Option<String>,
    },
    /// Compute the CRC-8 of a frame body and print the completed frame
    Crc {
        /// Body bytes as hex (command and fields, without checksum)
        #[arg(required = true)]
        hex: Vec<String>,
    },
    /// Validate a dictionary file
    DictValidate {
        file: String,
        /// Print the active dictionary as JSON after validation
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// List commands and payload types from a dictionary file
    DictList { file: String },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { dict, hex } => frame_decode(&dict, &hex),
        Commands::Encode {
            dict,
            request,
            request_file,
        } => frame_encode(&dict, request.as_deref(), request_file.as_deref()),
        Commands::Crc { hex } => frame_crc(&hex),
        Commands::DictValidate { file, json } => dict_validate(&file, json),
        Commands::DictList { file } => dict_list(&file),
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_dictionary(path: &str) -> Result<Dictionary> {
    let file = devreg::load_dictionary_file(path)?;
    let dict = Dictionary::new(file.commands, file.payload_types);
    debug!(
        path,
        commands = dict.commands().len(),
        payload_types = dict.payload_types().len(),
        "dictionary loaded"
    );
    Ok(dict)
}

fn joined_hex(parts: &[String]) -> String {
    parts.join(" ")
}

fn frame_decode(dict_path: &str, hex: &[String]) -> Result<()> {
    let dict = load_dictionary(dict_path)?;
    let frame = codec::decode_hex_frame(&dict, &joined_hex(hex))?;
    if !frame.known_command {
        info!(code = frame.command_code, "command code not in dictionary");
    }
    println!("{}", serde_json::to_string_pretty(&frame.to_json())?);
    Ok(())
}

fn frame_encode(dict_path: &str, request: Option<&str>, request_file: Option<&str>) -> Result<()> {
    let raw = match (request, request_file) {
        (Some(r), None) => r.to_string(),
        (None, Some(f)) => {
            fs::read_to_string(f).with_context(|| format!("reading request: {f}"))?
        }
        _ => return Err(anyhow::anyhow!("provide --request <json> or --request-file <path>")),
    };
    let request: CommandRequest =
        serde_json::from_str(&raw).context("parsing command request")?;
    let dict = load_dictionary(dict_path)?;
    let frame = codec::encode_command(&dict, &request)?;
    println!("{}", frame.hex);
    Ok(())
}

fn crc_line(body: &[u8]) -> String {
    let crc = codec::crc8(body);
    let mut frame = body.to_vec();
    frame.push(crc);
    let hex: String = frame.iter().map(|b| format!("{b:02x}")).collect();
    format!("crc=0x{crc:02x}\tframe={hex}")
}

fn frame_crc(hex: &[String]) -> Result<()> {
    let body = codec::parse_hex_text(&joined_hex(hex))?;
    println!("{}", crc_line(&body));
    Ok(())
}

fn dict_validate(path: &str, json: bool) -> Result<()> {
    let file = devreg::load_dictionary_file(path)?;
    let problems = dictionary_problems(&file);
    let dict = Dictionary::new(file.commands, file.payload_types);
    if !problems.is_empty() {
        for p in &problems {
            println!("error: {p}");
        }
        return Err(anyhow::anyhow!("{} problem(s) in {path}", problems.len()));
    }
    println!(
        "ok: {} commands, {} payload types",
        dict.commands().len(),
        dict.payload_types().len()
    );
    if json {
        let out = serde_json::json!({
            "commands": dict.commands(),
            "payload_types": dict.payload_types(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    }
    Ok(())
}

/// Duplicate codes or names among active entries, and unsupported semantic types.
fn dictionary_problems(file: &devreg::DictionaryFile) -> Vec<String> {
    let mut problems = Vec::new();
    let active_commands: Vec<_> = file.commands.iter().filter(|c| c.is_active).collect();
    for (i, c) in active_commands.iter().enumerate() {
        if active_commands[..i].iter().any(|o| o.code == c.code) {
            problems.push(format!("duplicate command code 0x{:02x} ({})", c.code, c.name));
        }
        if active_commands[..i].iter().any(|o| o.name == c.name) {
            problems.push(format!("duplicate command name {}", c.name));
        }
    }
    let active_types: Vec<_> = file.payload_types.iter().filter(|p| p.is_active).collect();
    for (i, p) in active_types.iter().enumerate() {
        if active_types[..i].iter().any(|o| o.code == p.code) {
            problems.push(format!("duplicate payload type code 0x{:02x}", p.code));
        }
        if let Err(e) = p.semantic_type.parse::<codec::SemanticType>() {
            problems.push(format!("payload type 0x{:02x}: {e}", p.code));
        }
    }
    problems
}

fn dict_list(path: &str) -> Result<()> {
    let dict = load_dictionary(path)?;
    for c in dict.commands() {
        let fields: Vec<String> = c
            .fields
            .iter()
            .map(|f| {
                if f.unit.is_empty() {
                    f.name.clone()
                } else {
                    format!("{}[{}]", f.name, f.unit)
                }
            })
            .collect();
        println!("0x{:02x}\t{}\t{}\t{}", c.code, c.name, c.label(), fields.join(","));
    }
    for p in dict.payload_types() {
        println!("type 0x{:02x}\t{}", p.code, p.semantic_type);
    }
    Ok(())
}
