use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::pipeline::collab::{OutgoingFile, OutgoingMessage, ReplyTarget, ResponseSink};
use crate::pipeline::{Action, Node, PipelineError, SharedContext};
use crate::split::MarkupSplitter;

/// Splits the outgoing text, attaches images and table files, delivers,
/// then removes the table artifacts.
pub struct SendResponse {
    sink: Arc<dyn ResponseSink>,
    splitter: MarkupSplitter,
}

impl SendResponse {
    pub fn new(sink: Arc<dyn ResponseSink>, splitter: MarkupSplitter) -> Self {
        Self { sink, splitter }
    }
}

#[derive(Debug, Clone)]
pub struct SendPlan {
    pub target: ReplyTarget,
    pub text: String,
    pub images: Vec<OutgoingFile>,
    /// `(attachment name, path on disk)` for each table artifact.
    pub artifacts: Vec<(String, PathBuf)>,
}

/// Lay chunks and files out as platform messages.
///
/// - no chunks: the files alone, as a reply (nothing at all without files)
/// - one chunk: a reply carrying every file
/// - several: the first is a reply without files, the middle ones plain,
///   the last plain and carrying every file
pub fn plan_dispatch(chunks: Vec<String>, files: Vec<OutgoingFile>) -> Vec<OutgoingMessage> {
    let count = chunks.len();
    if count == 0 {
        if files.is_empty() {
            return Vec::new();
        }
        return vec![OutgoingMessage {
            content: None,
            files,
            reply: true,
        }];
    }

    let mut files = Some(files);
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let last = i + 1 == count;
            OutgoingMessage {
                content: Some(chunk),
                files: if last {
                    files.take().unwrap_or_default()
                } else {
                    Vec::new()
                },
                reply: i == 0,
            }
        })
        .collect()
}

#[async_trait]
impl Node<SharedContext> for SendResponse {
    type Prep = SendPlan;
    type Output = bool;

    fn name(&self) -> &'static str {
        "send_response"
    }

    fn prepare(&self, ctx: &SharedContext) -> Result<SendPlan, PipelineError> {
        Ok(SendPlan {
            target: ReplyTarget {
                channel_id: ctx.message.channel_id,
                message_id: ctx.message.message_id,
            },
            text: ctx.outgoing_text(),
            images: ctx
                .images
                .iter()
                .map(|img| OutgoingFile {
                    filename: img.filename.clone(),
                    data: img.bytes.clone(),
                })
                .collect(),
            artifacts: ctx
                .artifacts
                .iter()
                .map(|a| (a.attachment_name.clone(), a.file_path()))
                .collect(),
        })
    }

    async fn execute(&self, plan: SendPlan) -> Result<bool, PipelineError> {
        let mut files = plan.images;
        for (name, path) in &plan.artifacts {
            match tokio::fs::read(path).await {
                Ok(data) => files.push(OutgoingFile {
                    filename: name.clone(),
                    data,
                }),
                Err(e) => warn!(file = %name, error = %e, "table artifact unreadable, not attaching"),
            }
        }

        let chunks = self.splitter.split(&plan.text);
        let messages = plan_dispatch(chunks, files);
        let total = messages.len();
        if total == 0 {
            warn!(
                channel_id = plan.target.channel_id,
                message_id = plan.target.message_id,
                "reply is blank and has no attachments, nothing sent"
            );
            return Ok(true);
        }
        debug!(channel_id = plan.target.channel_id, messages = total, "dispatching reply");

        for (i, message) in messages.into_iter().enumerate() {
            if let Err(e) = self.sink.deliver(plan.target, message).await {
                warn!(
                    channel_id = plan.target.channel_id,
                    part = i + 1,
                    of = total,
                    error = %e,
                    "failed to deliver reply"
                );
                return Ok(false);
            }
        }
        info!(channel_id = plan.target.channel_id, messages = total, "reply delivered");
        Ok(true)
    }

    fn finalize(&self, ctx: &mut SharedContext, sent: bool) -> Result<Action, PipelineError> {
        for artifact in ctx.artifacts.drain(..) {
            let name = artifact.attachment_name;
            if let Err(e) = artifact.path.close() {
                warn!(file = %name, error = %e, "failed to remove table artifact");
            }
        }
        ctx.delivered = Some(sent);
        Ok(if sent { Action::Sent } else { Action::Failed })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::pipeline::collab::DispatchError;

    #[derive(Default)]
    struct CountingSink {
        delivered: Mutex<usize>,
    }

    #[async_trait]
    impl ResponseSink for CountingSink {
        async fn deliver(
            &self,
            _target: ReplyTarget,
            _message: OutgoingMessage,
        ) -> Result<(), DispatchError> {
            *self.delivered.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn blank_plan(text: &str) -> SendPlan {
        SendPlan {
            target: ReplyTarget {
                channel_id: 1,
                message_id: 2,
            },
            text: text.to_string(),
            images: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    #[tokio::test]
    async fn blank_reply_without_files_delivers_nothing() {
        let sink = Arc::new(CountingSink::default());
        let node = SendResponse::new(sink.clone(), MarkupSplitter::new(100));

        assert!(node.execute(blank_plan("  \n ")).await.unwrap());
        assert_eq!(*sink.delivered.lock().unwrap(), 0);

        assert!(node.execute(blank_plan("hello")).await.unwrap());
        assert_eq!(*sink.delivered.lock().unwrap(), 1);
    }

    fn file(name: &str) -> OutgoingFile {
        OutgoingFile {
            filename: name.to_string(),
            data: vec![1, 2, 3],
        }
    }

    fn chunks(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("part {i}")).collect()
    }

    #[test]
    fn nothing_to_send() {
        assert!(plan_dispatch(Vec::new(), Vec::new()).is_empty());
    }

    #[test]
    fn files_only_go_out_as_a_reply() {
        let plan = plan_dispatch(Vec::new(), vec![file("table_1.png")]);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].content, None);
        assert!(plan[0].reply);
        assert_eq!(plan[0].files.len(), 1);
    }

    #[test]
    fn single_chunk_carries_all_files() {
        let plan = plan_dispatch(chunks(1), vec![file("a.png"), file("a.md")]);
        assert_eq!(plan.len(), 1);
        assert!(plan[0].reply);
        assert_eq!(plan[0].content.as_deref(), Some("part 1"));
        assert_eq!(plan[0].files.len(), 2);
    }

    #[test]
    fn several_chunks_reply_first_and_attach_last() {
        let plan = plan_dispatch(chunks(3), vec![file("x.png"), file("x.md")]);
        assert_eq!(plan.len(), 3);

        assert!(plan[0].reply);
        assert!(plan[0].files.is_empty());

        assert!(!plan[1].reply);
        assert!(plan[1].files.is_empty());

        assert!(!plan[2].reply);
        let names: Vec<_> = plan[2].files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["x.png", "x.md"]);
        assert_eq!(plan[2].content.as_deref(), Some("part 3"));
    }

    #[test]
    fn two_chunks_without_files() {
        let plan = plan_dispatch(chunks(2), Vec::new());
        assert_eq!(plan.len(), 2);
        assert!(plan[0].reply && !plan[1].reply);
        assert!(plan.iter().all(|m| m.files.is_empty()));
    }
}
