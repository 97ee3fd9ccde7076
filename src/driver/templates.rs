use std::path::{Path, PathBuf};

/// Output file name templates
///
/// `%s` in a template is replaced by the hit name; a template without `%s` is
/// used as is. Every file lands in the output directory.
/// A `None` template disables the corresponding output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTemplates {
    pub output_dir: PathBuf,
    pub mask: Option<String>,
    pub datablock: Option<String>,
    pub strong: Option<String>,
    pub indexed: Option<String>,
    pub refined_experiments: Option<String>,
    pub integrated: Option<String>,
}
impl Default for OutputTemplates {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            mask: Some("%s_mask.p".into()),
            datablock: Some("%s_datablock.json".into()),
            strong: Some("%s_strong.pickle".into()),
            indexed: Some("%s_indexed.pickle".into()),
            refined_experiments: Some("%s_refined_experiments.json".into()),
            integrated: Some("%s_integrated.pickle".into()),
        }
    }
}
impl OutputTemplates {
    pub fn output_dir<P: AsRef<Path>>(self, output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            ..self
        }
    }
    pub fn mask(self, mask: Option<String>) -> Self {
        Self { mask, ..self }
    }
    fn resolve(&self, template: &Option<String>, hit: &str) -> Option<PathBuf> {
        template
            .as_ref()
            .map(|template| self.output_dir.join(template.replace("%s", hit)))
    }
    /// The output file paths of a hit
    pub fn paths(&self, hit: &str) -> OutputPaths {
        OutputPaths {
            mask: self.resolve(&self.mask, hit),
            datablock: self.resolve(&self.datablock, hit),
            strong: self.resolve(&self.strong, hit),
            indexed: self.resolve(&self.indexed, hit),
            refined_experiments: self.resolve(&self.refined_experiments, hit),
            integrated: self.resolve(&self.integrated, hit),
        }
    }
}

/// The output file paths of a hit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputPaths {
    pub mask: Option<PathBuf>,
    pub datablock: Option<PathBuf>,
    pub strong: Option<PathBuf>,
    pub indexed: Option<PathBuf>,
    pub refined_experiments: Option<PathBuf>,
    pub integrated: Option<PathBuf>,
}
