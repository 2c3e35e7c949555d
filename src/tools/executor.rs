//! Tool executor: dispatches invocations to capability collaborators

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::memory::MemoryStore;
use crate::events::Notifier;
use crate::{Error, Result};

/// Capabilities the assistant may invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Search remembered facts and preferences
    SearchMemory,
    /// List favourite recipes and memories
    ListFavourites,
    /// Remember a user preference
    SavePreference,
    /// Suggest an ingredient substitution
    SubstituteIngredient,
}

impl Capability {
    /// Every capability, in declaration order
    pub const ALL: [Self; 4] = [
        Self::SearchMemory,
        Self::ListFavourites,
        Self::SavePreference,
        Self::SubstituteIngredient,
    ];

    /// Resolve a capability from its wire name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Wire name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SearchMemory => "search_memory",
            Self::ListFavourites => "list_favourites",
            Self::SavePreference => "save_preference",
            Self::SubstituteIngredient => "substitute_ingredient",
        }
    }

    /// Function declaration advertised in the setup frame
    #[must_use]
    pub fn declaration(self) -> Value {
        match self {
            Self::SearchMemory => json!({
                "name": self.name(),
                "description": "Search what you remember about the user: preferences, dietary needs, past cooking.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "What to look for"
                        },
                        "top_k": {
                            "type": "integer",
                            "description": "Max results to return (default: 5)"
                        }
                    },
                    "required": ["query"]
                }
            }),
            Self::ListFavourites => json!({
                "name": self.name(),
                "description": "List the user's favourite recipes and saved items.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "limit": {
                            "type": "integer",
                            "description": "Max items to return (default: 10)"
                        }
                    }
                }
            }),
            Self::SavePreference => json!({
                "name": self.name(),
                "description": "Remember a user preference, such as a dislike, an allergy or a favourite cuisine.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "text": {
                            "type": "string",
                            "description": "The preference to remember"
                        },
                        "category": {
                            "type": "string",
                            "description": "Memory category (default: preference)"
                        }
                    },
                    "required": ["text"]
                }
            }),
            Self::SubstituteIngredient => json!({
                "name": self.name(),
                "description": "Note that you are suggesting a substitute for an ingredient the user lacks.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "ingredient": {
                            "type": "string",
                            "description": "The missing ingredient"
                        },
                        "substitute": {
                            "type": "string",
                            "description": "The suggested replacement"
                        }
                    },
                    "required": ["ingredient"]
                }
            }),
        }
    }

    /// `tools` entry for the setup frame
    #[must_use]
    pub fn declarations() -> Value {
        json!({
            "functionDeclarations": Self::ALL.into_iter().map(Self::declaration).collect::<Vec<_>>()
        })
    }
}

/// One requested tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Correlation id assigned by the remote
    pub id: String,
    /// Requested capability name
    pub name: String,
    /// Untyped arguments
    pub args: Map<String, Value>,
}

/// Runs tool invocations against the memory collaborators
pub struct ToolCallExecutor {
    memory: Arc<dyn MemoryStore>,
    notifier: Notifier,
}

impl ToolCallExecutor {
    /// Create an executor
    #[must_use]
    pub fn new(memory: Arc<dyn MemoryStore>, notifier: Notifier) -> Self {
        Self { memory, notifier }
    }

    /// Execute one invocation and produce its response payload
    ///
    /// Never fails: every error becomes `{"error": message}`.
    pub async fn execute(&self, invocation: &ToolInvocation) -> Value {
        tracing::debug!(id = %invocation.id, tool = %invocation.name, "executing tool");

        match self.run(invocation).await {
            Ok(result) => json!({ "result": result }),
            Err(e) => {
                tracing::warn!(
                    id = %invocation.id,
                    tool = %invocation.name,
                    error = %e,
                    "tool failed"
                );
                json!({ "error": error_message(e) })
            }
        }
    }

    async fn run(&self, invocation: &ToolInvocation) -> Result<Value> {
        let Some(capability) = Capability::from_name(&invocation.name) else {
            return Err(Error::Tool(format!("unknown tool: {}", invocation.name)));
        };

        let args = Value::Object(invocation.args.clone());
        match capability {
            Capability::SearchMemory => self.search(args).await,
            Capability::ListFavourites => self.list_favourites(args).await,
            Capability::SavePreference => self.save_preference(args).await,
            Capability::SubstituteIngredient => Self::substitute(args),
        }
    }

    async fn search(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct SearchArgs {
            query: String,
            #[serde(default = "default_top_k")]
            top_k: usize,
        }

        const fn default_top_k() -> usize {
            5
        }

        let args: SearchArgs = serde_json::from_value(args)
            .map_err(|e| Error::Tool(format!("search_memory: invalid arguments: {e}")))?;

        let records = self.memory.search(&args.query, args.top_k).await?;
        Ok(serde_json::to_value(records)?)
    }

    async fn list_favourites(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct ListArgs {
            #[serde(default = "default_limit")]
            limit: usize,
        }

        const fn default_limit() -> usize {
            10
        }

        let args: ListArgs = serde_json::from_value(args)
            .map_err(|e| Error::Tool(format!("list_favourites: invalid arguments: {e}")))?;

        let records = self.memory.list_favourites(args.limit).await?;
        Ok(serde_json::to_value(records)?)
    }

    async fn save_preference(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct SaveArgs {
            text: String,
            #[serde(default)]
            category: Option<String>,
        }

        let args: SaveArgs = serde_json::from_value(args)
            .map_err(|e| Error::Tool(format!("save_preference: invalid arguments: {e}")))?;

        let category = args.category.as_deref().unwrap_or("preference");
        let record = self.memory.add_memory(&args.text, category).await?;
        self.notifier.memory_saved(record.content.clone());

        Ok(json!({ "status": "saved", "id": record.id }))
    }

    fn substitute(args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct SubstituteArgs {
            #[serde(default)]
            ingredient: Option<String>,
        }

        let args: SubstituteArgs = serde_json::from_value(args)
            .map_err(|e| Error::Tool(format!("substitute_ingredient: invalid arguments: {e}")))?;

        Ok(json!({
            "status": "acknowledged",
            "ingredient": args.ingredient,
        }))
    }
}

/// Message text without the error-kind prefix
fn error_message(error: Error) -> String {
    match error {
        Error::Tool(message) => message,
        other => other.to_string(),
    }
}
