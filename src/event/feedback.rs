use async_trait::async_trait;
use std::io::{BufRead, Write};
use tokio::sync::{mpsc, Mutex};

use crate::core::Item;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Like,
    Dislike,
}

/// 交互反馈能力：两个调用都允许无限期阻塞
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    async fn present(&self, item: &Item) -> anyhow::Result<Verdict>;

    /// 远端拦截（反爬 / 凭据失效）时通知运维，返回即表示可以重试
    async fn intervention(&self, reason: &str) -> anyhow::Result<()>;
}

/// 终端反馈：任意输入 = 喜欢，直接回车 = 点踩
///
/// 输入由独立的系统线程读取后经 channel 送来；该线程不属于 runtime，
/// 等待输入时退出进程不会被它卡住。
pub struct TerminalFeedback {
    input: Mutex<mpsc::Receiver<String>>,
    preview_command: Option<String>,
}

impl TerminalFeedback {
    pub fn stdin(preview_command: Option<String>) -> Self {
        Self::from_reader(std::io::BufReader::new(std::io::stdin()), preview_command)
    }

    /// 启动读取线程；EOF 或读错误时线程结束，channel 随之关闭
    pub fn from_reader<R>(reader: R, preview_command: Option<String>) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let spawned = std::thread::Builder::new()
            .name("tagscout-stdin".into())
            .spawn(move || {
                for line in reader.lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            tracing::warn!("Reading input failed: {}", e);
                            break;
                        }
                    };
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
            });
        // 线程起不来时 channel 立即关闭，首次读取即报 "stdin closed"
        if let Err(e) = spawned {
            tracing::error!("Failed to start input thread: {}", e);
        }
        Self::new(rx, preview_command)
    }

    pub fn new(input: mpsc::Receiver<String>, preview_command: Option<String>) -> Self {
        Self {
            input: Mutex::new(input),
            preview_command,
        }
    }

    async fn read_line(&self, prompt: &str) -> anyhow::Result<String> {
        print!("{}", prompt);
        std::io::stdout().flush()?;
        match self.input.lock().await.recv().await {
            Some(line) => Ok(line),
            None => anyhow::bail!("stdin closed"),
        }
    }

    fn open_preview(&self, url: &str) {
        let Some(template) = &self.preview_command else {
            return;
        };
        match preview_args(template, url) {
            Some((program, args)) => {
                if let Err(e) = tokio::process::Command::new(&program).args(&args).spawn() {
                    tracing::warn!("Preview command {:?} failed: {}", program, e);
                }
            }
            None => tracing::warn!("Empty preview_command, skipping preview"),
        }
    }
}

/// 按空白切分命令模板并替换 `{url}`；不经过 shell
fn preview_args(template: &str, url: &str) -> Option<(String, Vec<String>)> {
    let mut parts = template.split_whitespace().map(|p| p.replace("{url}", url));
    let program = parts.next()?;
    Some((program, parts.collect()))
}

#[async_trait]
impl FeedbackSource for TerminalFeedback {
    async fn present(&self, item: &Item) -> anyhow::Result<Verdict> {
        let tags: Vec<&str> = item.tags.iter().map(String::as_str).collect();
        println!("\n#{}  {}", item.id, tags.join(" "));
        println!("preview: {}", item.preview_url);
        self.open_preview(&item.preview_url);

        let line = self.read_line("Like this? Enter for no: ").await?;
        Ok(if line.is_empty() {
            Verdict::Dislike
        } else {
            Verdict::Like
        })
    }

    async fn intervention(&self, reason: &str) -> anyhow::Result<()> {
        println!("\nSearch blocked: {}", reason);
        self.read_line("Refresh the credentials file, then press Enter to retry: ")
            .await?;
        Ok(())
    }
}
