use anyhow::Context;
use imageset_factory::{
    driver::{FrameProcessor, Hit, OutputTemplates, Shard, ShardDriver, ShardReport, EventList},
    Detector,
};
use indicatif::{ParallelProgressIterator, ProgressBar};
use rayon::prelude::*;
use serde::Serialize;
use std::{error::Error, path::PathBuf};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "process-shard",
    about = "Turns the events of a run shard into still image collections"
)]
struct Opt {
    /// Event list: CSV file with the columns `timestamp,wavelength,distance,data`
    events: PathBuf,
    /// Output directory
    #[structopt(short, long, default_value = "out")]
    output_dir: PathBuf,
    /// Shard rank
    #[structopt(short, long, default_value = "0")]
    rank: usize,
    /// Number of shards
    #[structopt(short, long, default_value = "1")]
    size: usize,
    /// Process all the shards in parallel
    #[structopt(short, long)]
    all: bool,
    /// Detector number of pixels along the fast axis
    #[structopt(long)]
    nx: usize,
    /// Detector number of pixels along the slow axis
    #[structopt(long)]
    ny: usize,
    /// Detector pixel size [mm]
    #[structopt(long, default_value = "0.11")]
    pixel_size: f64,
    /// Lowest trusted pixel value
    #[structopt(long, default_value = "0")]
    trusted_min: f64,
    /// Highest trusted pixel value
    #[structopt(long, default_value = "65535")]
    trusted_max: f64,
    /// Detector vendor tag
    #[structopt(long, default_value = "cspad")]
    vendor: String,
    /// Mask file name template, `%s` is replaced by the hit name
    #[structopt(long)]
    mask_template: Option<String>,
    /// Do not write masks
    #[structopt(long)]
    no_mask: bool,
}

#[derive(Debug, Serialize)]
struct Summary {
    #[serde(rename = "Hit")]
    hit: String,
    #[serde(rename = "Wavelength [A]")]
    wavelength: f64,
    #[serde(rename = "Distance [mm]")]
    distance: f64,
    #[serde(rename = "Pixel sum")]
    pixel_sum: i64,
    #[serde(rename = "Trusted pixels")]
    trusted: usize,
}

struct Summarize;
impl FrameProcessor for Summarize {
    type Output = Summary;
    fn process(&mut self, hit: &Hit) -> Result<Self::Output, Box<dyn Error + Send + Sync>> {
        let models = hit.collection.require_models(0)?;
        let data = hit.collection.raw_data(0)?;
        let trusted = hit
            .collection
            .mask(0)?
            .map_or(data.len(), |mask| mask.into_iter().filter(|&m| m).count());
        Ok(Summary {
            hit: hit.name.clone(),
            wavelength: models.beam.wavelength,
            distance: models.detector.distance,
            pixel_sum: data.iter().map(|&x| x as i64).sum(),
            trusted,
        })
    }
}

fn run_shard(opt: &Opt, events: &EventList, rank: usize) -> anyhow::Result<ShardReport> {
    let detector = Detector::new(0., (opt.pixel_size, opt.pixel_size), (opt.nx, opt.ny))
        .trusted_range((opt.trusted_min, opt.trusted_max));
    let mut templates = OutputTemplates::default().output_dir(&opt.output_dir);
    if opt.no_mask {
        templates = templates.mask(None);
    } else if let Some(template) = &opt.mask_template {
        templates = templates.mask(Some(template.clone()));
    }
    let driver = ShardDriver::new(Shard::new(rank, opt.size)?, detector, templates)?
        .vendor(opt.vendor.as_str());
    let (report, summaries) = driver.run(events, &mut Summarize)?;

    std::fs::create_dir_all(&opt.output_dir)?;
    let path = opt.output_dir.join(format!("shard-{:03}.csv", rank));
    let mut wtr = csv::Writer::from_path(&path)
        .with_context(|| format!("failed to create {:?}", path))?;
    for summary in summaries {
        wtr.serialize(summary)?;
    }
    wtr.flush()?;
    Ok(report)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let events = EventList::load(&opt.events)?;
    let report = if opt.all {
        let pb = ProgressBar::new(opt.size as u64);
        (0..opt.size)
            .into_par_iter()
            .progress_with(pb)
            .map(|rank| run_shard(&opt, &events, rank))
            .collect::<anyhow::Result<Vec<ShardReport>>>()?
            .into_iter()
            .fold(ShardReport::default(), |a, r| a + r)
    } else {
        run_shard(&opt, &events, opt.rank)?
    };

    println!("SUMMARY:");
    println!(" - # of events: {}", report.total());
    println!(" - processed: {}", report.processed);
    println!(" - skipped: {}", report.skipped);
    println!(" - failed: {}", report.failed);

    Ok(())
}
