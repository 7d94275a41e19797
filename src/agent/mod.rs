//! Agent mode: the chat model may call tools before it answers.

pub mod calculator;

use crate::db::models::{Message, Role};
use crate::llm::{ChatMessage, ChatRequest, ToolCall, ToolDefinition};
use crate::rag::{format_context, Answer, RagError, RagPipeline, Source};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

/// Upper bound on model calls for one question.
pub const MAX_TURNS: usize = 5;

const AGENT_PROMPT: &str = "You are a helpful assistant with access to tools. \
Use `search_documents` to look up facts in the user's uploaded documents, \
`calculator` for any arithmetic and `current_time` when the date or time matters. \
Call tools only when they help, then answer the question directly and cite document sources you used.";

pub struct Agent {
    rag: Arc<RagPipeline>,
}

/// Result of running one tool call.
struct ToolOutcome {
    output: String,
    sources: Vec<Source>,
}

impl ToolOutcome {
    fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            sources: Vec::new(),
        }
    }
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "calculator".to_string(),
            description: "Evaluate an arithmetic expression with + - * / % ^ and parentheses.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "expression": {"type": "string", "description": "e.g. (15 * 23) + 47"}
                },
                "required": ["expression"]
            }),
        },
        ToolDefinition {
            name: "current_time".to_string(),
            description: "Current date and time in UTC.".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        },
        ToolDefinition {
            name: "search_documents".to_string(),
            description: "Search the uploaded documents for passages relevant to a query.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "What to look for"}
                },
                "required": ["query"]
            }),
        },
    ]
}

fn string_arg(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl Agent {
    pub fn new(rag: Arc<RagPipeline>) -> Self {
        Self { rag }
    }

    pub async fn run(&self, question: &str, history: &[Message]) -> Result<Answer, RagError> {
        let mut messages = vec![ChatMessage::system(AGENT_PROMPT)];
        messages.extend(history.iter().filter_map(|m| match m.role {
            Role::User => Some(ChatMessage::user(m.content.clone())),
            Role::Assistant => Some(ChatMessage::assistant(m.content.clone())),
            Role::System => None,
        }));
        messages.push(ChatMessage::user(question));

        let options = self.rag.options();
        let mut reasoning_steps = Vec::new();
        let mut sources: Vec<Source> = Vec::new();

        for turn in 0..MAX_TURNS {
            let last_turn = turn + 1 == MAX_TURNS;
            let request = ChatRequest {
                messages: messages.clone(),
                model: options.model.clone(),
                temperature: Some(options.temperature),
                // The final turn must produce an answer.
                tools: if last_turn { Vec::new() } else { tool_definitions() },
            };
            let response = self.rag.llm().chat(&request).await?;

            if response.tool_calls.is_empty() || last_turn {
                return Ok(Answer {
                    body: response.content,
                    sources,
                    reasoning_steps,
                });
            }

            messages.push(ChatMessage::assistant_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                let outcome = self.call_tool(call).await?;
                log::debug!("agent tool {} -> {}", call.name, outcome.output);
                reasoning_steps.push(format!("{}({}) -> {}", call.name, call.arguments, first_line(&outcome.output)));
                for source in outcome.sources {
                    if !sources
                        .iter()
                        .any(|s| s.document_id == source.document_id && s.chunk_index == source.chunk_index)
                    {
                        sources.push(source);
                    }
                }
                messages.push(ChatMessage::tool(call.id.clone(), outcome.output));
            }
        }

        // MAX_TURNS is non-zero, so the loop always returns.
        Ok(Answer {
            body: String::new(),
            sources,
            reasoning_steps,
        })
    }

    /// Tool failures are reported back to the model; only upstream errors
    /// from retrieval abort the run.
    async fn call_tool(&self, call: &ToolCall) -> Result<ToolOutcome, RagError> {
        let arguments: Value = if call.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(value) => value,
                Err(e) => return Ok(ToolOutcome::text(format!("Error: invalid arguments: {}", e))),
            }
        };

        let outcome = match call.name.as_str() {
            "calculator" => match string_arg(&arguments, "expression") {
                Some(expression) => match calculator::evaluate(&expression) {
                    Ok(value) => ToolOutcome::text(calculator::format_number(value)),
                    Err(e) => ToolOutcome::text(format!("Error: {}", e)),
                },
                None => ToolOutcome::text("Error: missing 'expression'"),
            },
            "current_time" => {
                ToolOutcome::text(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            "search_documents" => match string_arg(&arguments, "query") {
                Some(query) => {
                    let chunks = self.rag.retrieve(&query).await?;
                    if chunks.is_empty() {
                        ToolOutcome::text("No relevant passages found.")
                    } else {
                        ToolOutcome {
                            output: format_context(&chunks),
                            sources: chunks.iter().map(Source::from).collect(),
                        }
                    }
                }
                None => ToolOutcome::text("Error: missing 'query'"),
            },
            other => ToolOutcome::text(format!("Error: unknown tool '{}'", other)),
        };
        Ok(outcome)
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;
    use crate::rag::RagOptions;
    use crate::testing::{tool_call_reply, KeywordEmbedder, ScriptedChatModel};
    use crate::vector_store::memory::MemoryStore;
    use pretty_assertions::assert_eq;

    fn agent(replies: Vec<ChatResponse>) -> (Agent, Arc<RagPipeline>, Arc<ScriptedChatModel>) {
        let llm = Arc::new(ScriptedChatModel::with_replies(replies));
        let rag = Arc::new(RagPipeline::new(
            Arc::new(KeywordEmbedder::new(64)),
            Arc::new(MemoryStore::new("test", 64)),
            llm.clone(),
            RagOptions {
                similarity_threshold: 0.1,
                ..RagOptions::default()
            },
        ));
        (Agent::new(rag.clone()), rag, llm)
    }

    #[tokio::test]
    async fn test_calculator_tool_round_trip() {
        let (agent, _, llm) = agent(vec![
            tool_call_reply("call_1", "calculator", json!({"expression": "15 * 23 + 47"})),
            ChatResponse::text("The result is 392.", "scripted"),
        ]);

        let answer = agent.run("What is 15 * 23 + 47?", &[]).await.unwrap();
        assert_eq!(answer.body, "The result is 392.");
        assert_eq!(
            answer.reasoning_steps,
            vec![r#"calculator({"expression":"15 * 23 + 47"}) -> 392"#.to_string()]
        );

        let requests = llm.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 3);
        let tool_message = requests[1].messages.last().unwrap();
        assert_eq!(tool_message.role, "tool");
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_message.content, "392");
    }

    #[tokio::test]
    async fn test_search_documents_collects_sources() {
        let (agent, rag, _) = agent(vec![
            tool_call_reply("call_1", "search_documents", json!({"query": "capital of Atlantis"})),
            ChatResponse::text("Poseidonia.", "scripted"),
        ]);
        rag.ingest("atlantis.txt", b"The capital of Atlantis is Poseidonia.", None)
            .await
            .unwrap();

        let answer = agent.run("Capital of Atlantis?", &[]).await.unwrap();
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].source, "atlantis.txt");
        assert!(answer.reasoning_steps[0].starts_with("search_documents("));
    }

    #[tokio::test]
    async fn test_tool_errors_are_fed_back() {
        let (agent, _, llm) = agent(vec![
            tool_call_reply("c1", "calculator", json!({"expression": "1 / 0"})),
            tool_call_reply("c2", "teleport", json!({})),
            ChatResponse::text("Cannot compute.", "scripted"),
        ]);
        let answer = agent.run("1/0?", &[]).await.unwrap();
        assert_eq!(answer.body, "Cannot compute.");
        assert!(answer.reasoning_steps[0].ends_with("-> Error: division by zero"));
        assert!(answer.reasoning_steps[1].ends_with("-> Error: unknown tool 'teleport'"));
        assert_eq!(llm.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_turns_are_bounded() {
        let replies = (0..10)
            .map(|i| tool_call_reply(&format!("c{i}"), "current_time", json!({})))
            .collect();
        let (agent, _, llm) = agent(replies);
        agent.run("loop forever", &[]).await.unwrap();

        let requests = llm.requests();
        assert_eq!(requests.len(), MAX_TURNS);
        assert!(requests.last().unwrap().tools.is_empty());
    }
}
