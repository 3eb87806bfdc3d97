//! Maze sources - local generation and the remote maze service

use super::{generator, CellType, Grid, Position};
use crate::config::{MazeConfig, RemoteMazeConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Cell value the remote service uses to mark a player start
const PLAYER_MARKER: i64 = 3;

/// Errors raised by a maze source
#[derive(Debug, Error)]
pub enum MazeError {
    #[error("Maze service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Maze service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Maze service refused: {0}")]
    Refused(String),

    #[error("Malformed maze response: {0}")]
    Malformed(String),

    #[error("Generated maze rejected: {0}")]
    Invalid(String),

    #[error("Maze service timed out after {0:?}")]
    Timeout(Duration),
}

/// A generated grid together with one start position per player
#[derive(Debug, Clone)]
pub struct MazeLayout {
    pub grid: Grid,
    pub starts: Vec<Position>,
}

/// Something that can produce a maze layout for a match
#[async_trait]
pub trait MazeSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Produce a layout with exactly `players` start positions
    async fn generate(
        &self,
        width: usize,
        height: usize,
        players: usize,
    ) -> Result<MazeLayout, MazeError>;
}

/// Recursive-backtracker generation with players on the grid corners
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalMazeSource;

impl LocalMazeSource {
    /// Build a layout synchronously. Never fails.
    pub fn layout(&self, width: usize, height: usize, players: usize) -> MazeLayout {
        let grid = generator::generate(width, height);
        let starts = generator::start_corners(width, height)
            .into_iter()
            .take(players)
            .collect();
        MazeLayout { grid, starts }
    }
}

#[async_trait]
impl MazeSource for LocalMazeSource {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn generate(
        &self,
        width: usize,
        height: usize,
        players: usize,
    ) -> Result<MazeLayout, MazeError> {
        Ok(self.layout(width, height, players))
    }
}

/// Maze source backed by an LLM endpoint speaking the Responses API
#[derive(Clone)]
pub struct RemoteMazeSource {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    organization: Option<String>,
    project: Option<String>,
}

impl RemoteMazeSource {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
            organization: None,
            project: None,
        }
    }

    /// Build from configuration, reading the API key from the environment
    /// when it is not set inline
    pub fn from_config(config: &RemoteMazeConfig) -> Self {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok());
        Self {
            api_key,
            organization: config.organization.clone(),
            project: config.project.clone(),
            ..Self::new(config.endpoint.clone(), config.model.clone())
        }
    }

    fn request_body(&self, width: usize, height: usize, players: usize) -> serde_json::Value {
        let instructions = format!(
            "You are a maze generating assistant. Generate a maze with dimensions {width}x{height} where:\n\
             - 0 represents walls\n\
             - 1 represents free cells (paths)\n\
             - 2 represents the finish point (exactly one)\n\
             - 3 represents player positions (exactly {players} players)\n\n\
             The maze MUST follow these requirements:\n\
             1. All outer edges must be walls (0)\n\
             2. There must be exactly one finish point (2) near the center, between row {} and {}, and between column {} and {}\n\
             3. There must be exactly {players} player positions (3) placed near different corners of the maze\n\
             4. The maze must have valid paths from all player starting positions to the finish\n\
             5. Player positions should be far from each other, ideally in different corners\n\
             6. Create a proper maze structure with distinct corridors and walls\n\
             Return a JSON object with a 'grid' property containing a 2D array representing the complete grid.\n",
            height / 2 - 2,
            height / 2 + 2,
            width / 2 - 2,
            width / 2 + 2,
        );

        json!({
            "model": self.model,
            "input": format!(
                "Generate a {width}x{height} maze with {players} players. There must be exactly {players} player positions (3) placed near different corners of the maze"
            ),
            "instructions": instructions,
            "parallel_tool_calls": false,
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": "maze_grid",
                    "strict": true,
                    "schema": {
                        "type": "object",
                        "properties": {
                            "grid": {
                                "type": "array",
                                "description": "Maze rows; 0=wall, 1=path, 2=finish, 3=player start",
                                "items": {
                                    "type": "array",
                                    "items": { "type": "integer", "enum": [0, 1, 2, 3] }
                                }
                            }
                        },
                        "required": ["grid"],
                        "additionalProperties": false
                    }
                }
            }
        })
    }
}

#[async_trait]
impl MazeSource for RemoteMazeSource {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn generate(
        &self,
        width: usize,
        height: usize,
        players: usize,
    ) -> Result<MazeLayout, MazeError> {
        tracing::info!(
            "Requesting {}x{} maze for {} players from {}",
            width,
            height,
            players,
            self.endpoint
        );

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(width, height, players));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org);
        }
        if let Some(project) = &self.project {
            request = request.header("OpenAI-Project", project);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(MazeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let cells = parse_response(&body)?;
        validate_remote_grid(&cells, width, height, players)
    }
}

#[derive(Deserialize)]
struct ResponsesBody {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<ContentItem>,
}

#[derive(Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
    refusal: Option<String>,
}

#[derive(Deserialize)]
struct GridPayload {
    grid: Vec<Vec<i64>>,
}

/// Extract the raw cell rows from a Responses API body
pub(crate) fn parse_response(body: &str) -> Result<Vec<Vec<i64>>, MazeError> {
    let parsed: ResponsesBody =
        serde_json::from_str(body).map_err(|e| MazeError::Malformed(e.to_string()))?;

    for item in parsed.output.iter().filter(|item| item.kind == "message") {
        for content in &item.content {
            match content.kind.as_str() {
                "refusal" => {
                    return Err(MazeError::Refused(
                        content.refusal.clone().unwrap_or_default(),
                    ))
                }
                "output_text" => {
                    if let Some(text) = content.text.as_deref().filter(|t| !t.is_empty()) {
                        let payload: GridPayload = serde_json::from_str(text)
                            .map_err(|e| MazeError::Malformed(e.to_string()))?;
                        return Ok(payload.grid);
                    }
                }
                _ => {}
            }
        }
    }

    Err(MazeError::Malformed("no output_text in response".into()))
}

/// Convert raw rows from the remote service into a checked layout
///
/// Player markers are collected in row-major order and turned into free
/// cells.
pub fn validate_remote_grid(
    cells: &[Vec<i64>],
    width: usize,
    height: usize,
    players: usize,
) -> Result<MazeLayout, MazeError> {
    if cells.len() != height || cells.iter().any(|row| row.len() != width) {
        return Err(MazeError::Invalid(format!(
            "expected {}x{} grid, got {} rows",
            width,
            height,
            cells.len()
        )));
    }

    let mut grid = Grid::filled(width, height, CellType::Wall);
    let mut starts = Vec::new();
    for (y, row) in cells.iter().enumerate() {
        for (x, value) in row.iter().enumerate() {
            let pos = Position::new(x as i32, y as i32);
            let cell = if *value == PLAYER_MARKER {
                starts.push(pos);
                CellType::Free
            } else {
                CellType::from_code(*value).ok_or_else(|| {
                    MazeError::Invalid(format!("unknown cell value {} at {}", value, pos))
                })?
            };
            if grid.is_border(pos) && *value != CellType::Wall.code() as i64 {
                return Err(MazeError::Invalid(format!("missing wall at edge {}", pos)));
            }
            grid.set(pos, cell);
        }
    }

    let layout = MazeLayout { grid, starts };
    verify_layout(&layout, width, height, players)?;
    Ok(layout)
}

/// Check the invariants every layout must satisfy before a match starts
pub fn verify_layout(
    layout: &MazeLayout,
    width: usize,
    height: usize,
    players: usize,
) -> Result<(), MazeError> {
    let grid = &layout.grid;
    if grid.width() != width || grid.height() != height {
        return Err(MazeError::Invalid(format!(
            "expected {}x{} grid, got {}x{}",
            width,
            height,
            grid.width(),
            grid.height()
        )));
    }
    if !grid.border_is_walled() {
        return Err(MazeError::Invalid("border is not walled".into()));
    }

    let finishes = grid.count(CellType::Finish);
    if finishes != 1 {
        return Err(MazeError::Invalid(format!(
            "{} finish cells instead of 1",
            finishes
        )));
    }
    if layout.starts.len() != players {
        return Err(MazeError::Invalid(format!(
            "{} player positions instead of {}",
            layout.starts.len(),
            players
        )));
    }

    let distinct: HashSet<_> = layout.starts.iter().collect();
    if distinct.len() != layout.starts.len() {
        return Err(MazeError::Invalid("player positions overlap".into()));
    }

    let finish = grid
        .finish()
        .ok_or_else(|| MazeError::Invalid("no finish cell".into()))?;
    for start in &layout.starts {
        if grid.get(*start) != Some(CellType::Free) {
            return Err(MazeError::Invalid(format!("start {} is not free", start)));
        }
        if !grid.connects(*start, finish) {
            return Err(MazeError::Invalid(format!(
                "no path from {} to finish {}",
                start, finish
            )));
        }
    }

    Ok(())
}

/// Chooses between the remote source and local generation
///
/// The remote source is fixed at construction. Any error, timeout, or
/// invalid layout from it falls back to local generation, so
/// [`MazeProvider::layout`] always succeeds.
#[derive(Clone)]
pub struct MazeProvider {
    local: LocalMazeSource,
    remote: Option<Arc<dyn MazeSource>>,
    timeout: Duration,
}

impl MazeProvider {
    /// Local generation only
    pub fn local() -> Self {
        Self {
            local: LocalMazeSource,
            remote: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Try `remote` first, bounded by `timeout`
    pub fn with_remote(remote: Arc<dyn MazeSource>, timeout: Duration) -> Self {
        Self {
            local: LocalMazeSource,
            remote: Some(remote),
            timeout,
        }
    }

    pub fn from_config(config: &MazeConfig) -> Self {
        if config.remote.enabled {
            tracing::info!("Remote maze generation enabled: {}", config.remote.endpoint);
            Self::with_remote(
                Arc::new(RemoteMazeSource::from_config(&config.remote)),
                Duration::from_secs(config.remote.timeout_secs),
            )
        } else {
            Self::local()
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Produce a valid layout for `players` players
    pub async fn layout(&self, width: usize, height: usize, players: usize) -> MazeLayout {
        if let Some(remote) = &self.remote {
            let result = tokio::time::timeout(self.timeout, remote.generate(width, height, players))
                .await
                .unwrap_or(Err(MazeError::Timeout(self.timeout)))
                .and_then(|layout| {
                    verify_layout(&layout, width, height, players)?;
                    Ok(layout)
                });

            match result {
                Ok(layout) => {
                    tracing::info!("Using maze from {} source", remote.name());
                    return layout;
                }
                Err(e) => {
                    tracing::warn!(
                        "{} maze source failed, falling back to local generation: {}",
                        remote.name(),
                        e
                    );
                }
            }
        }

        self.local.layout(width, height, players)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_output_text() {
        let body = r#"{"output":[{"type":"reasoning"},{"type":"message","content":[
            {"type":"output_text","text":"{\"grid\":[[0,0],[0,2]]}"}]}]}"#;
        let cells = parse_response(body).unwrap();
        assert_eq!(cells, vec![vec![0, 0], vec![0, 2]]);
    }

    #[test]
    fn test_parse_response_refusal() {
        let body = r#"{"output":[{"type":"message","content":[
            {"type":"refusal","refusal":"no mazes today"}]}]}"#;
        let err = parse_response(body).unwrap_err();
        assert!(matches!(err, MazeError::Refused(reason) if reason == "no mazes today"));
    }

    #[test]
    fn test_parse_response_without_output() {
        assert!(matches!(
            parse_response(r#"{"id":"resp_1"}"#),
            Err(MazeError::Malformed(_))
        ));
    }

    #[test]
    fn test_inline_api_key_wins_over_environment() {
        let config = RemoteMazeConfig {
            api_key: Some("sk-inline".to_string()),
            api_key_env: "GRIDRUNNERS_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        let source = RemoteMazeSource::from_config(&config);
        assert_eq!(source.api_key.as_deref(), Some("sk-inline"));

        let config = RemoteMazeConfig {
            api_key: None,
            ..config
        };
        assert!(RemoteMazeSource::from_config(&config).api_key.is_none());
    }
}
