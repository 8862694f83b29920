//! Built-in tool definitions shipped with the gateway.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use warden_policy::{AccessRequest, FileOperation};

use crate::definition::{HandlerFuture, ToolDefinition};
use crate::registry::ToolRegistry;
use crate::{ToolError, ToolResult};

/// Fetches a URL on behalf of the `builtin:http_fetch` tool.
///
/// The gateway core performs no outbound HTTP itself; deployments wire a
/// fetcher backed by their HTTP stack.
#[async_trait]
pub trait UrlFetcher: Send + Sync {
    /// Fetches `url` and returns the response body as text.
    async fn fetch(&self, url: &str) -> ToolResult<String>;
}

/// Options controlling which built-ins are registered.
#[derive(Default)]
pub struct BuiltinOptions {
    /// When present, registers `builtin:http_fetch` backed by this fetcher.
    pub fetcher: Option<Arc<dyn UrlFetcher>>,
}

fn arg_str(args: &Value, key: &str) -> ToolResult<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| ToolError::execution(format!("missing string argument `{key}`")))
}

fn file_resource(operation: FileOperation) -> fn(&Value) -> Option<AccessRequest> {
    match operation {
        FileOperation::Read => |args| {
            Some(AccessRequest::File {
                path: args.get("path")?.as_str()?.to_owned(),
                operation: FileOperation::Read,
            })
        },
        FileOperation::Write => |args| {
            Some(AccessRequest::File {
                path: args.get("path")?.as_str()?.to_owned(),
                operation: FileOperation::Write,
            })
        },
        FileOperation::List => |args| {
            Some(AccessRequest::File {
                path: args.get("path")?.as_str()?.to_owned(),
                operation: FileOperation::List,
            })
        },
        FileOperation::Delete => |args| {
            Some(AccessRequest::File {
                path: args.get("path")?.as_str()?.to_owned(),
                operation: FileOperation::Delete,
            })
        },
    }
}

fn shell_resource(args: &Value) -> Option<AccessRequest> {
    let command = args.get("command")?.as_str()?.to_owned();
    let shell_args = args
        .get("args")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();
    Some(AccessRequest::Shell {
        command,
        args: shell_args,
    })
}

fn url_host_resource(args: &Value) -> Option<AccessRequest> {
    let url = args.get("url")?.as_str()?;
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next()?;
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok()),
        None => (authority, None),
    };
    let protocol = url.split_once("://").map(|(scheme, _)| scheme.to_owned());
    Some(AccessRequest::Network {
        host: host.to_owned(),
        port,
        protocol,
    })
}

/// Registers the built-in tool set on `registry`.
///
/// # Errors
///
/// Propagates duplicate-registration errors.
pub fn register_builtins(registry: &ToolRegistry, options: BuiltinOptions) -> ToolResult<()> {
    let echo = Arc::new(|args: Value| -> HandlerFuture { Box::pin(async move { Ok(args) }) });
    registry.register(
        ToolDefinition::new("builtin:echo", "Echo", echo)?
            .with_description("Returns its arguments unchanged")
            .with_category("utility"),
    )?;

    let file_read = Arc::new(|args: Value| -> HandlerFuture {
        Box::pin(async move {
            let path = arg_str(&args, "path")?;
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| ToolError::execution(format!("read {path}: {err}")))?;
            Ok(json!({"path": path, "content": content}))
        })
    });
    registry.register(
        ToolDefinition::new("builtin:file_read", "Read file", file_read)?
            .with_description("Reads a UTF-8 file")
            .with_category("filesystem")
            .with_required_permissions(["filesystem.read"])?
            .with_resource_extractor(file_resource(FileOperation::Read)),
    )?;

    let file_write = Arc::new(|args: Value| -> HandlerFuture {
        Box::pin(async move {
            let path = arg_str(&args, "path")?;
            let content = arg_str(&args, "content")?;
            tokio::fs::write(&path, content.as_bytes())
                .await
                .map_err(|err| ToolError::execution(format!("write {path}: {err}")))?;
            Ok(json!({"path": path, "bytes": content.len()}))
        })
    });
    registry.register(
        ToolDefinition::new("builtin:file_write", "Write file", file_write)?
            .with_description("Writes a UTF-8 file")
            .with_category("filesystem")
            .with_required_permissions(["filesystem.write"])?
            .with_resource_extractor(file_resource(FileOperation::Write))
            .with_confirmation(),
    )?;

    let file_list = Arc::new(|args: Value| -> HandlerFuture {
        Box::pin(async move {
            let path = arg_str(&args, "path")?;
            let mut entries = tokio::fs::read_dir(&path)
                .await
                .map_err(|err| ToolError::execution(format!("list {path}: {err}")))?;
            let mut names = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| ToolError::execution(err.to_string()))?
            {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            Ok(json!({"path": path, "entries": names}))
        })
    });
    registry.register(
        ToolDefinition::new("builtin:file_list", "List directory", file_list)?
            .with_description("Enumerates a directory")
            .with_category("filesystem")
            .with_required_permissions(["filesystem.list"])?
            .with_resource_extractor(file_resource(FileOperation::List)),
    )?;

    let shell = Arc::new(|args: Value| -> HandlerFuture {
        Box::pin(async move {
            let command = arg_str(&args, "command")?;
            let shell_args: Vec<String> = args
                .get("args")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_str)
                        .map(ToOwned::to_owned)
                        .collect()
                })
                .unwrap_or_default();
            let output = tokio::process::Command::new(&command)
                .args(&shell_args)
                .output()
                .await
                .map_err(|err| ToolError::execution(format!("spawn {command}: {err}")))?;
            Ok(json!({
                "status": output.status.code(),
                "stdout": String::from_utf8_lossy(&output.stdout),
                "stderr": String::from_utf8_lossy(&output.stderr),
            }))
        })
    });
    registry.register(
        ToolDefinition::new("builtin:shell_exec", "Execute command", shell)?
            .with_description("Runs a command and captures its output")
            .with_category("shell")
            .with_required_permissions(["shell.execute"])?
            .with_resource_extractor(shell_resource)
            .with_confirmation(),
    )?;

    if let Some(fetcher) = options.fetcher {
        let fetch = Arc::new(move |args: Value| -> HandlerFuture {
            let fetcher = Arc::clone(&fetcher);
            Box::pin(async move {
                let url = arg_str(&args, "url")?;
                let body = fetcher.fetch(&url).await?;
                Ok(json!({"url": url, "body": body}))
            })
        });
        registry.register(
            ToolDefinition::new("builtin:http_fetch", "Fetch URL", fetch)?
                .with_description("Fetches a URL as text")
                .with_category("network")
                .with_required_permissions(["network.request"])?
                .with_resource_extractor(url_host_resource),
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_host_extraction() {
        let resource = url_host_resource(&json!({"url": "https://api.example.com:8443/v1?q=1"}));
        let Some(AccessRequest::Network {
            host,
            port,
            protocol,
        }) = resource
        else {
            panic!("expected network resource");
        };
        assert_eq!(host, "api.example.com");
        assert_eq!(port, Some(8443));
        assert_eq!(protocol.as_deref(), Some("https"));

        let bare = url_host_resource(&json!({"url": "example.com/path"}));
        let Some(AccessRequest::Network { host, port, .. }) = bare else {
            panic!("expected network resource");
        };
        assert_eq!(host, "example.com");
        assert_eq!(port, None);
    }

    #[test]
    fn builtins_register_once() {
        let registry = ToolRegistry::default();
        register_builtins(&registry, BuiltinOptions::default()).unwrap();
        assert!(registry.get("builtin:echo").is_some());
        assert!(registry.get("builtin:file_read").is_some());
        assert!(registry.get("builtin:shell_exec").is_some());
        assert!(registry.get("builtin:http_fetch").is_none());

        let err = register_builtins(&registry, BuiltinOptions::default())
            .expect_err("double registration");
        assert!(matches!(err, ToolError::DuplicateTool { .. }));
    }

    #[tokio::test]
    async fn fetcher_enables_http_fetch() {
        struct StaticFetcher;

        #[async_trait]
        impl UrlFetcher for StaticFetcher {
            async fn fetch(&self, _url: &str) -> ToolResult<String> {
                Ok("body".into())
            }
        }

        let registry = ToolRegistry::default();
        register_builtins(
            &registry,
            BuiltinOptions {
                fetcher: Some(Arc::new(StaticFetcher)),
            },
        )
        .unwrap();
        let definition = registry.get("builtin:http_fetch").unwrap();
        let output = definition
            .handler()
            .invoke(json!({"url": "https://example.com"}))
            .await
            .unwrap();
        assert_eq!(output["body"], "body");
    }
}
