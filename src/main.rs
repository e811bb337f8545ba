use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vhmm::cli::{self, DataFile, ModelKind, ModelOptions};
use vhmm::config::FitConfig;
use vhmm::covariance::CovarianceType;
use vhmm::error::Result;
use vhmm::fb::Algorithm;

///
/// Classical and variational HMM training
///
#[derive(Parser, Debug)]
struct Opts {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit a model to json samples and print the report as json
    Fit {
        /// `{"x": [[..]], "lengths": [..]}`
        #[clap(long)]
        input: PathBuf,
        /// categorical, gaussian or gmm
        #[clap(long, default_value = "gaussian")]
        model: ModelKind,
        /// spherical, diag, full or tied
        #[clap(long, default_value = "full")]
        covariance: CovarianceType,
        #[clap(long, default_value = "2")]
        states: usize,
        /// mixture components per state (gmm)
        #[clap(long, default_value = "1")]
        n_mix: usize,
        /// alphabet size (categorical), `max(x) + 1` if omitted
        #[clap(long)]
        n_symbols: Option<usize>,
        /// Bayesian treatment (VB-EM) instead of EM
        #[clap(long)]
        variational: bool,
        /// FitConfig json
        #[clap(long)]
        config: Option<PathBuf>,
        /// viterbi or map, overrides the config
        #[clap(long)]
        algorithm: Option<Algorithm>,
        #[clap(long, default_value = "0")]
        seed: u64,
    },
    /// Print samples of a synthetic HMM as json
    Sample {
        #[clap(long, default_value = "2")]
        states: usize,
        #[clap(long, default_value = "2")]
        features: usize,
        /// sample symbols of a categorical HMM instead
        #[clap(long)]
        n_symbols: Option<usize>,
        #[clap(long, value_delimiter = ',', default_value = "100")]
        lengths: Vec<usize>,
        #[clap(long, default_value = "0")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let opts: Opts = Opts::parse();
    match opts.command {
        Command::Fit {
            input,
            model,
            covariance,
            states,
            n_mix,
            n_symbols,
            variational,
            config,
            algorithm,
            seed,
        } => {
            let mut config = match config {
                Some(path) => FitConfig::from_json_file(path)?,
                None => FitConfig::default(),
            };
            if let Some(algorithm) = algorithm {
                config.algorithm = algorithm;
            }
            let data = DataFile::from_json_file(input)?;
            let model_opts = ModelOptions {
                kind: model,
                variational,
                n_states: states,
                covariance_type: covariance,
                n_mix,
                n_symbols,
            };
            let output = cli::fit(&model_opts, &data, config, seed)?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Sample {
            states,
            features,
            n_symbols,
            lengths,
            seed,
        } => {
            let data = cli::sample(states, features, n_symbols, &lengths, seed)?;
            println!("{}", serde_json::to_string(&data)?);
        }
    }
    Ok(())
}
