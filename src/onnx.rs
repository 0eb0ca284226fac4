//! ONNX Runtime backed [`InferenceEngine`] for the DeepFilterNet3 streaming export.
//!
//! The model is a single graph taking the three feature histories and the
//! recurrent state, and returning the enhanced spectrum of the newest frame
//! together with the next recurrent state:
//!
//! | input          | shape              | output          | shape              |
//! |----------------|--------------------|-----------------|--------------------|
//! | `spec_buf`     | `[1, 1, T, F, 2]`  | `enhanced_spec` | `[1, 1, 1, F, 2]`  |
//! | `feat_erb_buf` | `[1, 1, T, E]`     | `mask`          | `[1, 1, 1, E]`     |
//! | `feat_spec_buf`| `[1, 1, T, D, 2]`  | `lsnr`          | `[1, 1, 1]`        |
//! | `h_enc_in`     | `[1, 1, 256]`      | `h_enc_out`     | `[1, 1, 256]`      |
//! | `h_erb_in`     | `[1, 2, 256]`      | `h_erb_out`     | `[1, 2, 256]`      |
//! | `h_df_in`      | `[1, 2, 256]`      | `h_df_out`      | `[1, 2, 256]`      |

use std::path::Path;

use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use crate::bridge::{HiddenSlot, InferenceEngine, InferenceError, ModelInput, ModelOutput};
use crate::{Error, Result, HIDDEN_DIM};

const INPUT_NAMES: [&str; 6] = [
    "spec_buf",
    "feat_erb_buf",
    "feat_spec_buf",
    "h_enc_in",
    "h_erb_in",
    "h_df_in",
];

const HIDDEN_OUTPUTS: [(HiddenSlot, &str); 3] = [
    (HiddenSlot::Encoder, "h_enc_out"),
    (HiddenSlot::Erb, "h_erb_out"),
    (HiddenSlot::Df, "h_df_out"),
];

pub struct OnnxEngine {
    session: Session,
    has_mask: bool,
    has_lsnr: bool,
    /// Which of [`HIDDEN_OUTPUTS`] the graph provides.
    hidden_outputs: [bool; 3],
}

impl OnnxEngine {
    /// Load a streaming model with single-threaded intra-op execution.
    pub fn new(model_path: &Path) -> Result<Self> {
        Self::with_threads(model_path, 1)
    }

    /// Load a streaming model with an explicit intra-op thread count.
    ///
    /// For real-time audio keep this at 1-2 to minimize latency variance.
    pub fn with_threads(model_path: &Path, intra_threads: usize) -> Result<Self> {
        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?;

        #[cfg(feature = "coreml")]
        {
            use ort::execution_providers::CoreMLExecutionProvider;
            builder =
                builder.with_execution_providers([CoreMLExecutionProvider::default().build()])?;
            log::info!("CoreML execution provider registered");
        }

        #[cfg(feature = "cuda")]
        {
            use ort::execution_providers::CUDAExecutionProvider;
            builder = builder.with_execution_providers([CUDAExecutionProvider::default().build()])?;
            log::info!("CUDA execution provider registered");
        }

        let session = builder.commit_from_file(model_path)?;

        for name in INPUT_NAMES {
            if !session.inputs().iter().any(|i| i.name() == name) {
                return Err(Error::Config(format!(
                    "{} has no '{}' input; not a streaming enhancement model",
                    model_path.display(),
                    name
                )));
            }
        }
        let has_output = |name: &str| session.outputs().iter().any(|o| o.name() == name);
        if !has_output("enhanced_spec") {
            return Err(Error::Config(format!(
                "{} has no 'enhanced_spec' output",
                model_path.display()
            )));
        }
        let has_mask = has_output("mask");
        let has_lsnr = has_output("lsnr");
        let hidden_outputs = HIDDEN_OUTPUTS.map(|(_, name)| has_output(name));
        if hidden_outputs.iter().any(|&present| !present) {
            log::warn!("Model does not return every recurrent state; missing ones stay at zero");
        }

        log::info!(
            "Loaded {} ({} intra-op threads)",
            model_path.display(),
            intra_threads
        );
        Ok(Self {
            session,
            has_mask,
            has_lsnr,
            hidden_outputs,
        })
    }
}

impl InferenceEngine for OnnxEngine {
    fn infer(
        &mut self,
        input: &ModelInput<'_>,
        output: &mut ModelOutput,
    ) -> std::result::Result<(), InferenceError> {
        let t = input.history_len;

        // ORT takes ownership of the tensor data
        let spec = Tensor::from_array(([1usize, 1, t, input.bin_count, 2], input.spec.to_vec()))?;
        let erb = Tensor::from_array(([1usize, 1, t, input.erb_bands], input.erb.to_vec()))?;
        let df_spec =
            Tensor::from_array(([1usize, 1, t, input.df_bins, 2], input.df_spec.to_vec()))?;
        let h_enc = Tensor::from_array(([1usize, 1, HIDDEN_DIM], input.hidden.enc.to_vec()))?;
        let h_erb = Tensor::from_array(([1usize, 2, HIDDEN_DIM], input.hidden.erb.to_vec()))?;
        let h_df = Tensor::from_array(([1usize, 2, HIDDEN_DIM], input.hidden.df.to_vec()))?;

        let outputs = self.session.run(ort::inputs![
            "spec_buf" => spec,
            "feat_erb_buf" => erb,
            "feat_spec_buf" => df_spec,
            "h_enc_in" => h_enc,
            "h_erb_in" => h_erb,
            "h_df_in" => h_df,
        ])?;

        let (_spec_shape, spec_data) = outputs["enhanced_spec"].try_extract_tensor::<f32>()?;
        output.write_enhanced_spec(spec_data)?;

        if self.has_mask {
            let (_mask_shape, mask_data) = outputs["mask"].try_extract_tensor::<f32>()?;
            output.write_mask(mask_data)?;
        }
        if self.has_lsnr {
            let (_lsnr_shape, lsnr_data) = outputs["lsnr"].try_extract_tensor::<f32>()?;
            if let Some(&lsnr) = lsnr_data.first() {
                output.set_lsnr(lsnr);
            }
        }

        for (&(slot, name), &present) in HIDDEN_OUTPUTS.iter().zip(&self.hidden_outputs) {
            if present {
                let (_h_shape, h_data) = outputs[name].try_extract_tensor::<f32>()?;
                output.write_hidden(slot, h_data);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "onnx"
    }
}
