#[cfg(feature = "configs")]
pub mod configuration {
    use config::Config;
    use validator::Validate;

    use crate::ExporterOptions;

    #[derive(Debug, thiserror::Error)]
    pub enum LoadError {
        #[error("Config error: {0}")]
        Config(#[from] config::ConfigError),
        #[error("Invalid exporter options: {0}")]
        Invalid(#[from] validator::ValidationErrors),
    }

    /// Reads exporter options from `path` (any format `config` understands).
    /// Keys use the camelCase names, e.g. `convertTrueFalse` or `tableName`.
    pub fn load_options(path: &str) -> Result<ExporterOptions, LoadError> {
        let settings = Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        let options: ExporterOptions = settings.try_deserialize()?;
        options.validate()?;
        Ok(options)
    }
}
