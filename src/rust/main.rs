use anyhow::Context;
use clap::Parser;
use log::info;
use occipital::{
    evaluate, load, load_tag_file, predict, save, FittedPipeline, LbfgsOptions, OnnxBackbone, PipelineBuilder,
    PipelineContext,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding `images/` and `inception/inception.onnx`
    #[arg(long, env = "OCCIPITAL_ASSETS", default_value = "assets")]
    assets: PathBuf,

    /// Where the trained pipeline is saved
    #[arg(long, default_value = "model.json")]
    model: PathBuf,

    /// Load the saved pipeline instead of training a new one
    #[arg(long)]
    reuse: bool,
}

fn train(assets: &Path, ctx: &PipelineContext) -> anyhow::Result<FittedPipeline> {
    let images = assets.join("images");
    let backbone = Arc::new(
        OnnxBackbone::inception(assets.join("inception").join("inception.onnx"), ctx)
            .context("opening the Inception backbone")?,
    );
    let pipeline = PipelineBuilder::inception(ctx, backbone, LbfgsOptions::default())?;

    let training = load_tag_file(images.join("tags.tsv")).context("reading training tags")?;
    info!("=== Training on {} images ===", training.len());
    let start = Instant::now();
    let fitted = pipeline.fit(&training)?;
    info!("=== Training done (took {:.2?}) ===", start.elapsed());
    Ok(fitted)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let ctx = PipelineContext::new();
    let images = args.assets.join("images");

    let fitted = if args.reuse {
        info!("Loading saved pipeline from {:?}", args.model);
        load(&args.model, &ctx).with_context(|| format!("loading {:?}", args.model))?
    } else {
        let fitted = train(&args.assets, &ctx)?;
        save(&fitted, &args.model).with_context(|| format!("saving {:?}", args.model))?;
        fitted
    };

    let test = load_tag_file(images.join("test-tags.tsv")).context("reading test tags")?;
    for prediction in fitted.transform(&test)? {
        println!(
            "Image: {} predicted as: {} with score: {}",
            prediction.path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            prediction.predicted_label,
            prediction.confidence()
        );
    }

    let metrics = evaluate(&fitted, &test)?;
    println!("=============== Evaluating ===============");
    println!("LogLoss is: {}", metrics.log_loss);
    let per_class: Vec<String> = metrics.per_class_log_loss.iter().map(|l| l.to_string()).collect();
    println!("PerClassLogLoss is: {}", per_class.join(" , "));
    println!("Macro accuracy is: {}", metrics.macro_accuracy);

    println!("=============== Single image ===============");
    let prediction = predict(&fitted, images.join("toaster3.jpg"))?;
    println!(
        "Image: toaster3.jpg predicted as: {} with score: {}",
        prediction.predicted_label,
        prediction.confidence()
    );
    Ok(())
}
