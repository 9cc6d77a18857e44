//! flowline-audio — speech payload types for flowline pipelines.
//!
//! Defines the synthesis and recognition payloads plus aliases that pin
//! the generic flow machinery to those payloads. A speech backend
//! implements [`PipelineProvider`] over these types and plugs into a
//! [`SpeechSynthesisFlow`] or [`SpeechRecognitionFlow`] unchanged.
//!
//! [`PipelineProvider`]: flowline_provider::PipelineProvider

pub mod requests;
pub mod types;

pub use requests::{
    SpeechRecognitionRequest, SpeechRecognitionResult, SpeechSynthesisRequest,
    SpeechSynthesisResult,
};
pub use types::{AudioFormat, AudioQuality};

use flowline_flow::PipelineFlow;
use flowline_scale::Pipeline;

pub type SpeechSynthesisFlow = PipelineFlow<SpeechSynthesisRequest, SpeechSynthesisResult>;
pub type SpeechRecognitionFlow = PipelineFlow<SpeechRecognitionRequest, SpeechRecognitionResult>;

pub type SpeechSynthesisPipeline = Pipeline<SpeechSynthesisRequest, SpeechSynthesisResult>;
pub type SpeechRecognitionPipeline = Pipeline<SpeechRecognitionRequest, SpeechRecognitionResult>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use flowline_core::{Capability, Request, Response};
    use flowline_flow::{FlowConfig, StreamSlot};
    use flowline_provider::{
        PipelineProvider, ProviderDescriptor, ProviderResult,
    };

    /// Minimal synthesis backend: one second of silence per request.
    struct SilenceSynthesizer {
        descriptor: ProviderDescriptor,
    }

    impl SilenceSynthesizer {
        fn new() -> Self {
            Self {
                descriptor: ProviderDescriptor::new("https://localhost", "", "silence-v1")
                    .with_capability(Capability::SpeechSynthesis),
            }
        }
    }

    #[async_trait]
    impl PipelineProvider<SpeechSynthesisRequest, SpeechSynthesisResult> for SilenceSynthesizer {
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.descriptor
        }

        async fn initialize(&self) -> ProviderResult<()> {
            Ok(())
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn process_request(
            &self,
            request: Request<SpeechSynthesisRequest>,
        ) -> ProviderResult<Response<SpeechSynthesisResult>> {
            let result = SpeechSynthesisResult {
                audio: vec![0u8; 16_000],
                length: 1.0 / request.payload.speed,
                format: request.payload.format,
            };
            Ok(Response::for_request(&request, result))
        }

        async fn cleanup(&self) {}
    }

    #[tokio::test]
    async fn synthesis_round_trips_through_a_flow() {
        let provider = Arc::new(SilenceSynthesizer::new());
        let slot = StreamSlot::provider(
            "tts",
            provider
                as Arc<dyn PipelineProvider<SpeechSynthesisRequest, SpeechSynthesisResult>>,
        );
        let flow: Arc<SpeechSynthesisFlow> =
            SpeechSynthesisFlow::new(FlowConfig::default().with_name("tts"), vec![slot]);
        flow.start();

        let request = SpeechSynthesisRequest::new("hello").with_format(AudioFormat::Ogg);
        let response = flow.submit(request).await.unwrap();

        assert_eq!(response.payload.format, AudioFormat::Ogg);
        assert!(!response.payload.audio.is_empty());
        assert_eq!(flow.capabilities().len(), 1);
    }
}
