use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::pipeline::collab::{RenderedImage, TableRenderer};
use crate::pipeline::context::required;
use crate::pipeline::{Action, Node, PipelineError, SharedContext};
use crate::table::TableData;

pub struct RenderTables {
    renderer: Option<Arc<dyn TableRenderer>>,
}

impl RenderTables {
    pub fn new(renderer: Option<Arc<dyn TableRenderer>>) -> Self {
        Self { renderer }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedTable {
    pub ordinal: usize,
    pub data: TableData,
}

#[async_trait]
impl Node<SharedContext> for RenderTables {
    type Prep = Vec<RenderedTable>;
    type Output = Vec<RenderedImage>;

    fn name(&self) -> &'static str {
        "render_tables"
    }

    fn prepare(&self, ctx: &SharedContext) -> Result<Vec<RenderedTable>, PipelineError> {
        let extraction = required(&ctx.extraction, "extraction")?;
        Ok(extraction
            .tables
            .iter()
            .map(|t| RenderedTable {
                ordinal: t.key.ordinal,
                data: t.data.clone(),
            })
            .collect())
    }

    async fn execute(&self, tables: Vec<RenderedTable>) -> Result<Vec<RenderedImage>, PipelineError> {
        let Some(renderer) = &self.renderer else {
            debug!(tables = tables.len(), "no table renderer configured");
            return Ok(Vec::new());
        };

        let mut images = Vec::with_capacity(tables.len());
        for table in &tables {
            match renderer.render(&table.data).await {
                Ok(mut image) => {
                    image.filename = format!("table_{}.png", table.ordinal);
                    images.push(image);
                }
                Err(e) => warn!(ordinal = table.ordinal, error = %e, "table render failed, skipping"),
            }
        }
        Ok(images)
    }

    fn finalize(
        &self,
        ctx: &mut SharedContext,
        images: Vec<RenderedImage>,
    ) -> Result<Action, PipelineError> {
        if images.is_empty() {
            return Ok(Action::NoImages);
        }
        ctx.images = images;
        Ok(Action::ImagesRendered)
    }
}
