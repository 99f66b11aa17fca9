use anyhow::{Context, Result};
use ort::execution_providers;
use ort::session::builder::GraphOptimizationLevel;
pub use ort::session::{Session, SessionOutputs};
use std::path::Path;
use std::sync::Once;
use tracing::{debug, warn};

static ORT_INIT: Once = Once::new();

pub fn initialize_model(models_dir: &Path, model_file: &str, threads: usize) -> Result<Session> {
    ORT_INIT.call_once(|| {
        let committed = ort::init()
            .with_execution_providers([
                execution_providers::XNNPACKExecutionProvider::default().build()
            ])
            .commit();
        if let Err(e) = committed {
            warn!("Failed to set up onnxruntime environment: {e:?}");
        }
    });

    let path = models_dir.join(model_file);
    debug!("Loading model {path:?} with {threads} threads");

    let model = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads.max(1))?
        .commit_from_file(&path)
        .with_context(|| format!("loading model {path:?}"))?;

    Ok(model)
}
