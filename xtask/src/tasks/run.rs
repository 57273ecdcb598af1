use anyhow::Result;
use burn::backend::{Autodiff, NdArray, Wgpu, ndarray::NdArrayDevice, wgpu::WgpuDevice};
use burn::tensor::backend::AutodiffBackend;
use burn_instantdl::{RunConfig, RunReport, run_experiment};
use clap::{Args, ValueEnum};

use super::ConfigArgs;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum BackendArg {
    #[default]
    Ndarray,
    Wgpu,
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(long, value_enum, default_value_t = BackendArg::Ndarray)]
    pub backend: BackendArg,

    /// Run Monte-Carlo dropout on the test set after training.
    #[arg(long)]
    pub uncertainty: bool,

    #[arg(long)]
    pub no_evaluation: bool,
}

pub fn run(args: &RunArgs) -> Result<()> {
    let mut config = args.config.resolve()?;
    if args.uncertainty {
        config = config.with_calculate_uncertainty(true);
    }
    if args.no_evaluation {
        config = config.with_evaluation(false);
    }

    tracing::info!("Running on the {:?} backend", args.backend);
    let report = match args.backend {
        BackendArg::Ndarray => launch::<Autodiff<NdArray>>(config, NdArrayDevice::default())?,
        BackendArg::Wgpu => launch::<Autodiff<Wgpu>>(config, WgpuDevice::default())?,
    };

    println!("Algorithm:        {}", report.algorithm.name());
    println!("Input shape:      {:?}", report.descriptor.network_input_shape);
    println!(
        "Split:            {} train / {} validation",
        report.train_files, report.val_files
    );
    println!("Epochs run:       {}", report.training.epochs_run);
    if let Some(loss) = report.training.best_val_loss {
        println!("Best val loss:    {loss:.6}");
    }
    println!("Test predictions: {}", report.predictions);
    if let Some(summary) = &report.uncertainty {
        println!(
            "Uncertainty:      {:.6} mean over {} passes",
            summary.mean_uncertainty, summary.passes
        );
    }
    if let Some(evaluation) = &report.evaluation {
        println!("Evaluation:       {}", serde_json::to_string(evaluation)?);
    }

    Ok(())
}

fn launch<B: AutodiffBackend>(
    config: RunConfig,
    device: B::Device,
) -> Result<RunReport> {
    Ok(run_experiment::<B>(config, device)?)
}
