//! `reify`: annotate fusions in a serialized program with estimated reification cost.
//!
//! ```bash
//! reify annotate --program model.json --preset rtx-a6000 --output annotated.json
//! reify annotate --program model.json --profile my_gpu.json --count-multiple-input-accesses false
//! reify profile --preset rtx-a6000 > my_gpu.json
//! ```

mod report;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use log::info;
use reify::{CostAnalysisOptions, CostModelStatsCollection, HardwareProfile, Program};

#[derive(Parser)]
#[command(name = "reify")]
#[command(about = "Estimate per-fusion reification cost and record it in backend configs")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cost-model stats pass over a program and print one row per fusion
    Annotate {
        /// Program JSON to annotate
        #[arg(long, value_name = "FILE")]
        program: PathBuf,

        /// Hardware profile JSON; overrides --preset
        #[arg(long, value_name = "FILE")]
        profile: Option<PathBuf>,

        /// Built-in hardware profile
        #[arg(long, value_enum, default_value_t = Preset::RtxA6000)]
        preset: Preset,

        /// Charge an operand once per consuming read instead of once per fusion body
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        count_multiple_input_accesses: bool,

        /// Estimate distinct fusion bodies in parallel
        #[arg(long)]
        parallel: bool,

        /// Where to write the annotated program
        #[arg(long, short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,

        /// Print the annotated program as text
        #[arg(long)]
        print_program: bool,
    },
    /// Print a built-in hardware profile as JSON
    Profile {
        #[arg(long, value_enum, default_value_t = Preset::RtxA6000)]
        preset: Preset,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Preset {
    RtxA6000,
}

impl Preset {
    fn profile(self) -> HardwareProfile {
        match self {
            Preset::RtxA6000 => HardwareProfile::rtx_a6000(),
        }
    }
}

fn load_profile(path: Option<&PathBuf>, preset: Preset) -> Result<HardwareProfile> {
    let Some(path) = path else {
        return Ok(preset.profile());
    };
    let src = fs::read_to_string(path)
        .with_context(|| format!("failed to read hardware profile {}", path.display()))?;
    HardwareProfile::from_json_str(&src)
        .with_context(|| format!("invalid hardware profile {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Commands::Annotate {
            program: program_path,
            profile,
            preset,
            count_multiple_input_accesses,
            parallel,
            output,
            print_program,
        } => {
            let mut program = Program::load_json(&program_path)
                .with_context(|| format!("failed to load program {}", program_path.display()))?;
            let profile = load_profile(profile.as_ref(), preset)?;
            info!(
                "annotating '{}' with profile '{}'",
                program.name(),
                profile.name
            );

            let pass = CostModelStatsCollection::new(
                Arc::new(profile),
                CostAnalysisOptions {
                    count_multiple_input_accesses,
                    parallel,
                },
            );
            let stats = pass
                .run_with_stats(&mut program)
                .context("cost model stats collection failed")?;

            let rows = report::fusion_rows(&program)?;
            print!("{}", report::format_rows(&rows));
            if print_program {
                println!("{}", program.to_text());
            }

            if let Some(path) = output {
                program
                    .save_json(&path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(
                    "wrote {} annotated fusion(s) to {}",
                    stats.annotated_nodes,
                    path.display()
                );
            }
        }
        Commands::Profile { preset } => {
            println!("{}", preset.profile().to_json_string()?);
        }
    }
    Ok(())
}
