use super::{exit_codes, read_input};
use crate::cli::args::ExtractArgs;
use dashjudge_core::extract::{extract, Extraction};

pub async fn run(args: ExtractArgs) -> anyhow::Result<i32> {
    let text = read_input(&args.file).await?;
    match extract(&text) {
        Extraction::Parsed(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(exit_codes::OK)
        }
        Extraction::Unparsed { error, .. } => {
            eprintln!("error: no JSON found: {}", error);
            Ok(exit_codes::TEST_FAILED)
        }
    }
}
