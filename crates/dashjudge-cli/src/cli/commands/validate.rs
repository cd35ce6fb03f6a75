use super::{exit_codes, read_input};
use crate::cli::args::ValidateArgs;
use dashjudge_core::repair::{validate, validate_layers, ValidateOptions, ValidationReport};

pub async fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let text = read_input(&args.file).await?;
    let opts = ValidateOptions {
        auto_fix: !args.no_fix,
        require_domain_structure: true,
        strict: args.strict,
    };
    let report = if args.layers {
        validate_layers(&text, &opts)
    } else {
        validate(&text, &opts)
    };

    if let (Some(out), Some(fixed)) = (&args.out, &report.fixed_text) {
        tokio::fs::write(out, fixed).await?;
        eprintln!("wrote {}", out.display());
    }
    print_report(&report, &args.format, args.out.is_none())?;

    Ok(if report.is_valid {
        exit_codes::OK
    } else {
        exit_codes::INVALID_DOCUMENT
    })
}

fn print_report(report: &ValidationReport, format: &str, emit_document: bool) -> anyhow::Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for fix in &report.fixes {
        eprintln!("fixed: {}", fix);
    }
    for w in &report.warnings {
        eprintln!("warning: {}", w);
    }
    for e in &report.errors {
        eprintln!("error: {}", e);
    }
    if report.is_valid {
        eprintln!("✅ valid{}", if report.was_fixed { " (repaired)" } else { "" });
    } else {
        eprintln!("❌ invalid");
    }
    if emit_document {
        if let Some(doc) = &report.fixed_text {
            println!("{}", doc);
        }
    }
    Ok(())
}
