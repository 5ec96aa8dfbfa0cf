use std::path::PathBuf;
use std::process;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use survey::{
    bank::{build_custom_block, build_part2_blocks, PART2_LURE_SEED},
    fnv::fnv1a32,
    random::Rng,
    survey_client::{SubmitOutcome, SurveyClient},
    survey_config::{SurveyConfig, SurveyPart},
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the FNV-1a 32-bit hash of each argument
    Hash { text: Vec<String> },

    /// Print the first few draws of the seeded generator
    Draw {
        /// Numeric seed
        #[arg(short, long)]
        seed: Option<u32>,

        /// Text to derive the seed from, e.g. a participant ID
        #[arg(short, long)]
        key: Option<String>,

        /// Number of draws to print
        #[arg(short, long, default_value_t = 3)]
        count: usize,
    },

    /// Shuffle the given items deterministically and print them one per line
    Shuffle {
        /// Numeric seed
        #[arg(short, long)]
        seed: Option<u32>,

        /// Text to derive the seed from, e.g. a participant ID
        #[arg(short, long)]
        key: Option<String>,

        items: Vec<String>,
    },

    /// Fetch a JSON document, bypassing caches, and pretty-print it
    Fetch { url: String },

    /// Validate a survey config file and show its completion codes
    CheckConfig { config: PathBuf },

    /// Submit a JSON payload using the URL and mode from a survey config
    Submit {
        /// Path to the survey config JSON
        #[arg(short, long)]
        config: PathBuf,

        /// Path to the JSON payload to submit
        payload: PathBuf,
    },

    /// Build the Part 2 blocks with per-question lures
    BuildPart2Blocks {
        /// The stage B bank blocks CSV
        #[arg(long)]
        stage_b: PathBuf,

        /// Directory of per-model result CSVs
        #[arg(long)]
        results_dir: PathBuf,

        /// Where to write block_NN.json files
        #[arg(long, default_value = "part2_blocks")]
        out_dir: PathBuf,

        /// Where to write the build metadata
        #[arg(long, default_value = "part2_metadata.json")]
        metadata: PathBuf,

        /// Seed mixed into every lure decision
        #[arg(long, default_value_t = PART2_LURE_SEED)]
        seed: u32,
    },

    /// Build a hand-picked block for both survey parts from a list of questions
    BuildCustomBlock {
        /// The stage B bank blocks CSV
        #[arg(long)]
        stage_b: PathBuf,

        /// Comma-separated question IDs, in display order
        #[arg(long, value_delimiter = ',', required = true)]
        question_ids: Vec<u32>,

        /// Block ID to write the custom block as
        #[arg(long, default_value_t = 10)]
        block_id: u32,

        /// Directory of Part 1 block_NN.json files
        #[arg(long, default_value = "blocks")]
        blocks_dir: PathBuf,

        /// Directory of Part 2 block_NN.json files
        #[arg(long, default_value = "part2_blocks")]
        part2_dir: PathBuf,
    },
}

fn make_rng(seed: Option<u32>, key: Option<String>) -> Result<Rng> {
    match (seed, key) {
        (Some(seed), None) => Ok(Rng::new(seed)),
        (None, Some(key)) => Ok(Rng::from_key(key)),
        (Some(_), Some(_)) => Err(anyhow!("Please provide either --seed or --key, not both.")),
        (None, None) => Err(anyhow!("Please provide --seed or --key.")),
    }
}

fn check_config(config: &SurveyConfig) {
    println!("Submit URL: {} ({})", config.submit_url, config.submit_mode);
    for (part, name) in [(SurveyPart::Part1, "Part 1"), (SurveyPart::Part2, "Part 2")] {
        println!(
            "{name} completion code: {} (new: {})",
            config.completion_code(part, false).unwrap_or("-"),
            config.completion_code(part, true).unwrap_or("-"),
        );
    }
    println!(
        "Part 2: {} old items, {} lures.",
        config.part2.num_old, config.part2.num_lures
    );
    for field in config.unconfigured_completion_codes() {
        println!("Warning: {field} still has a placeholder value.");
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Commands::Hash { text } => {
            for text in text {
                let hash = fnv1a32(&text);
                println!("{text}\t0x{hash:08x}\t{hash}");
            }
        }
        Commands::Draw { seed, key, count } => {
            let rng = make_rng(seed, key)?;
            for value in rng.take(count) {
                println!("{value}");
            }
        }
        Commands::Shuffle { seed, key, mut items } => {
            let mut rng = make_rng(seed, key)?;
            for item in rng.shuffle(&mut items).iter() {
                println!("{item}");
            }
        }
        Commands::Fetch { url } => {
            let client = SurveyClient::new();
            let value: serde_json::Value = client.load_json(&url)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::CheckConfig { config } => {
            check_config(&SurveyConfig::load(config)?);
        }
        Commands::Submit { config, payload } => {
            let config = SurveyConfig::load(config)?;
            let payload: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(&payload)?)?;
            let client = SurveyClient::new();
            match client.submit(&config, &payload)? {
                SubmitOutcome::Opaque => {
                    println!("Submitted in no-cors mode; the response is opaque.")
                }
                SubmitOutcome::Body(Some(body)) => {
                    println!("{}", serde_json::to_string_pretty(&body)?)
                }
                SubmitOutcome::Body(None) => println!("Submitted; the response was empty."),
            }
        }
        Commands::BuildPart2Blocks {
            stage_b,
            results_dir,
            out_dir,
            metadata,
            seed,
        } => {
            let bank = build_part2_blocks(stage_b, results_dir, seed)?;
            bank.write(out_dir, metadata)?;
        }
        Commands::BuildCustomBlock {
            stage_b,
            question_ids,
            block_id,
            blocks_dir,
            part2_dir,
        } => {
            let custom = build_custom_block(stage_b, &part2_dir, &question_ids, block_id)?;
            custom.write(blocks_dir, &part2_dir)?;
        }
    }
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        println!("error: {}", err);
        process::exit(1);
    }
}
