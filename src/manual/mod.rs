//! 维修手册索引
//!
//! 文档分块 + 向量化存储 + 相似度检索，供维护 Handler 查询。
//! 启动时把手册目录下的文本文件全部索引，重复索引同一文档会替换旧块。

use std::path::Path;
use std::sync::Arc;

use crate::llm::EmbeddingProvider;

/// 文档块
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 块 ID（doc_id + 序号）
    pub id: String,
    /// 原始文本
    pub text: String,
    /// 来源文档 ID
    pub source_id: String,
}

/// 分块策略
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// 目标块大小（字符数）
    pub chunk_size: usize,
    /// 块之间的重叠（字符数）
    pub chunk_overlap: usize,
    /// 分隔符优先级（从高到低）
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            separators: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                ". ".to_string(),
                "! ".to_string(),
                "? ".to_string(),
                " ".to_string(),
            ],
        }
    }
}

/// 文档分块器
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// 将文档分割为块（UTF-8 安全）
    pub fn chunk(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let chars: Vec<char> = text.chars().collect();
        let total_chars = chars.len();

        if total_chars == 0 {
            return chunks;
        }

        let mut current_idx = 0;
        let mut chunk_idx = 0;

        while current_idx < total_chars {
            let target_end = (current_idx + self.config.chunk_size).min(total_chars);
            let mut actual_end = target_end;

            // 如果不是文档末尾，尝试在分隔符处断开
            if target_end < total_chars {
                let slice: String = chars[current_idx..target_end].iter().collect();
                for sep in &self.config.separators {
                    if let Some(pos) = slice.rfind(sep) {
                        let chars_to_sep: usize = slice[..pos].chars().count() + sep.chars().count();
                        if chars_to_sep > 0 {
                            actual_end = current_idx + chars_to_sep;
                            break;
                        }
                    }
                }
            }

            // 确保至少前进一个字符
            if actual_end <= current_idx {
                actual_end = (current_idx + 1).min(total_chars);
            }

            let chunk_text: String = chars[current_idx..actual_end].iter().collect();
            let trimmed = chunk_text.trim();

            if !trimmed.is_empty() {
                chunks.push(Chunk {
                    id: format!("{}_{}", doc_id, chunk_idx),
                    text: trimmed.to_string(),
                    source_id: doc_id.to_string(),
                });
                chunk_idx += 1;
            }

            let overlap = self.config.chunk_overlap.min(actual_end - current_idx);
            let next_start = actual_end.saturating_sub(overlap);

            current_idx = if next_start > current_idx {
                next_start
            } else {
                actual_end
            };
        }

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

/// 检索结果
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    /// 相似度分数
    pub score: f32,
}

/// 手册索引：分块 + 向量存储 + 余弦检索
pub struct ManualIndex {
    chunker: Chunker,
    /// (chunk, embedding)
    entries: Vec<(Chunk, Vec<f32>)>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl ManualIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, chunking: ChunkingConfig) -> Self {
        Self {
            chunker: Chunker::new(chunking),
            entries: Vec::new(),
            embedder,
        }
    }

    /// 索引一篇文档；同名文档的旧块先删除
    pub async fn index_document(&mut self, doc_id: &str, text: &str) -> Result<usize, String> {
        self.entries.retain(|(c, _)| c.source_id != doc_id);

        let chunks = self.chunker.chunk(doc_id, text);
        let mut added = 0;
        for chunk in chunks {
            let embedding = self.embedder.embed(&chunk.text).await?;
            if embedding.is_empty() {
                continue;
            }
            self.entries.push((chunk, embedding));
            added += 1;
        }
        Ok(added)
    }

    /// 索引目录下的所有 .txt / .md 文件（文件名作为 doc_id）
    pub async fn index_dir(&mut self, dir: &Path) -> Result<usize, String> {
        let mut total = 0;
        let entries = std::fs::read_dir(dir).map_err(|e| e.to_string())?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_text = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "txt" || e == "md")
                .unwrap_or(false);
            if !is_text {
                continue;
            }
            let doc_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("manual")
                .to_string();
            let text = std::fs::read_to_string(&path).map_err(|e| e.to_string())?;
            total += self.index_document(&doc_id, &text).await?;
        }
        Ok(total)
    }

    /// 检索最相关的 k 个块，按相似度降序
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>, String> {
        let query_embedding = self.embedder.embed(query).await?;
        if query_embedding.is_empty() {
            return Ok(Vec::new());
        }

        // 无相关性下限：永远返回得分最高的 k 个块
        let mut scored: Vec<(f32, &Chunk)> = self
            .entries
            .iter()
            .map(|(chunk, emb)| (cosine_similarity(&query_embedding, emb), chunk))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, chunk)| RetrievalResult {
                chunk: chunk.clone(),
                score,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 余弦相似度
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
