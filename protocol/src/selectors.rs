use serde::Deserialize;
use serde::Serialize;

/// Parsing backend understood by the engine's `--backend` flag.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Backend {
    #[default]
    Pipeline,
    VlmHttpClient,
    HybridHttpClient,
    VlmAutoEngine,
    HybridAutoEngine,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParseMethod {
    #[default]
    Auto,
    Txt,
    Ocr,
}

/// Where the engine pulls its models from (`--source`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelSource {
    Huggingface,
    Modelscope,
    Local,
}
