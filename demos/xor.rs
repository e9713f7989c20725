//! Trains a 3 -> 4 -> 4 -> 1 network on four labelled points.
//!
//! Hyperparameters come from `MICRODIFF_*` environment variables; run with
//! `RUST_LOG=info` to see the loss reports.

use microdiff::{Dataset, Graph, TrainConfig, Trainer};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = TrainConfig::from_env()?;
    let trainer = Trainer::new(config)?;
    let dataset = Dataset::xor_demo();

    let mut graph = Graph::new();
    let model = trainer.build_model(&graph, &dataset)?;
    println!("{model}");

    let report = trainer.fit(&mut graph, &model, &dataset)?;
    for snapshot in &report.snapshots {
        println!("step: {} loss: {:.6}", snapshot.step + 1, snapshot.loss);
        print_predictions(&snapshot.predictions);
    }

    println!("final:");
    print_predictions(&report.predictions);
    Ok(())
}

fn print_predictions(predictions: &[f64]) {
    print!("predictions:");
    for p in predictions {
        print!(" {p:.4}");
    }
    println!();
}
