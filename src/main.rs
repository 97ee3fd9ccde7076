use anyhow::Context;
use imageset_factory::{
    BuildOptions, FormatParams, ImageSetFactory, ManifestAdapter, OpticalModels,
};
use std::path::PathBuf;
use structopt::StructOpt;

fn parse_param(arg: &str) -> Result<(String, String), String> {
    arg.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected key=value, found {:?}", arg))
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "imageset-factory",
    about = "Classifies frame manifests as sweeps or stills"
)]
struct Opt {
    /// Frame manifests (CSV, optionally bz2 compressed), glob patterns are expanded
    #[structopt(required = true)]
    manifests: Vec<String>,
    /// Frame indices, e.g. `0,1,2`
    #[structopt(short, long, use_delimiter = true)]
    indices: Option<Vec<usize>>,
    /// Assemble sweeps as sets of stills
    #[structopt(long)]
    stills: bool,
    /// Format parameter `key=value`, repeatable
    #[structopt(short, long = "param", parse(try_from_str = parse_param))]
    params: Vec<(String, String)>,
    /// Check that every frame has a complete set of models
    #[structopt(short, long)]
    check: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let mut paths: Vec<PathBuf> = vec![];
    for pattern in &opt.manifests {
        let matches = glob::glob(pattern)
            .with_context(|| format!("invalid pattern {:?}", pattern))?
            .collect::<Result<Vec<_>, _>>()?;
        if matches.is_empty() {
            paths.push(PathBuf::from(pattern));
        } else {
            paths.extend(matches);
        }
    }
    log::info!("Found {} manifest(s)", paths.len());

    let params: FormatParams = opt.params.into_iter().collect();
    let options = BuildOptions::default()
        .sweep_as_imageset(opt.stills)
        .params(params);
    let factory = ImageSetFactory::new(ManifestAdapter);
    for path in paths {
        let iset = factory
            .build_from_path(
                &path,
                OpticalModels::default(),
                opt.indices.as_deref(),
                &options,
            )
            .with_context(|| format!("failed to build an image collection from {:?}", path))?;
        iset.summary();
        if opt.check {
            iset.check_complete()?;
            println!(" - all frames have a complete set of models");
        }
    }

    Ok(())
}
