//! all-MiniLM-L6-v2 sentence embeddings on candle.
//!
//! The encoder is a plain post-norm BERT. Sentences are embedded in padded
//! batches: padding is masked out of self-attention and of the mean pooling,
//! and the pooled vector is L2-normalised, matching sentence-transformers.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{D, DType, Device, Module, Tensor};
use candle_nn::{Embedding, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;
use tracing::debug;

use crate::embed::Embedder;

/// Encoder hyperparameters. Missing `config.json` fields keep the
/// all-MiniLM-L6-v2 values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BertConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_attention_heads: usize,
    pub num_hidden_layers: usize,
    pub vocab_size: usize,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub layer_norm_eps: f64,
}

impl Default for BertConfig {
    fn default() -> Self {
        Self {
            hidden_size: 384,
            intermediate_size: 1536,
            num_attention_heads: 12,
            num_hidden_layers: 6,
            vocab_size: 30522,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
        }
    }
}

impl BertConfig {
    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Reads `config.json` beside the weights when present.
    fn for_weights(model_path: &Path) -> Result<Self> {
        let path = model_path.with_file_name("config.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
    }
}

struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    output_norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let h = config.hidden_size;
        let self_vb = vb.pp("self");
        let out_vb = vb.pp("output");

        Ok(Self {
            query: candle_nn::linear(h, h, self_vb.pp("query"))?,
            key: candle_nn::linear(h, h, self_vb.pp("key"))?,
            value: candle_nn::linear(h, h, self_vb.pp("value"))?,
            output: candle_nn::linear(h, h, out_vb.pp("dense"))?,
            output_norm: candle_nn::layer_norm(h, config.layer_norm_eps, out_vb.pp("LayerNorm"))?,
            num_heads: config.num_attention_heads,
            head_dim: config.head_dim(),
        })
    }

    fn split_heads(&self, x: &Tensor, batch: usize, seq_len: usize) -> Result<Tensor> {
        Ok(x.reshape((batch, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    /// `mask_bias` is (batch, 1, 1, seq) with 0 for tokens and a large
    /// negative value for padding.
    fn forward(&self, x: &Tensor, mask_bias: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = x.dims3()?;

        let q = self.split_heads(&self.query.forward(x)?, batch, seq_len)?;
        let k = self.split_heads(&self.key.forward(x)?, batch, seq_len)?;
        let v = self.split_heads(&self.value.forward(x)?, batch, seq_len)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = q.matmul(&k.t()?)?.affine(scale, 0.0)?;
        let scores = scores.broadcast_add(mask_bias)?;
        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;

        let context = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, self.num_heads * self.head_dim))?;
        let projected = self.output.forward(&context)?;

        Ok(self.output_norm.forward(&(x + projected)?)?)
    }
}

struct FeedForward {
    up: Linear,
    down: Linear,
    output_norm: LayerNorm,
}

impl FeedForward {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        Ok(Self {
            up: candle_nn::linear(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("intermediate").pp("dense"),
            )?,
            down: candle_nn::linear(
                config.intermediate_size,
                config.hidden_size,
                vb.pp("output").pp("dense"),
            )?,
            output_norm: candle_nn::layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("output").pp("LayerNorm"),
            )?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.up.forward(x)?.gelu_erf()?;
        let h = self.down.forward(&h)?;
        Ok(self.output_norm.forward(&(x + h)?)?)
    }
}

struct EncoderLayer {
    attention: SelfAttention,
    ffn: FeedForward,
}

impl EncoderLayer {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        Ok(Self {
            attention: SelfAttention::load(vb.pp("attention"), config)?,
            ffn: FeedForward::load(vb, config)?,
        })
    }

    fn forward(&self, x: &Tensor, mask_bias: &Tensor) -> Result<Tensor> {
        let x = self.attention.forward(x, mask_bias)?;
        self.ffn.forward(&x)
    }
}

struct BertEncoder {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    embedding_norm: LayerNorm,
    layers: Vec<EncoderLayer>,
    device: Device,
}

impl BertEncoder {
    fn load(path: &Path, config: &BertConfig, device: &Device) -> Result<Self> {
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };
        // Checkpoints exported from a full BertModel carry a "bert." prefix.
        let vb = if vb.contains_tensor("bert.embeddings.word_embeddings.weight") {
            vb.pp("bert")
        } else {
            vb
        };
        Self::new(vb, config, device)
    }

    fn new(vb: VarBuilder, config: &BertConfig, device: &Device) -> Result<Self> {
        let emb_vb = vb.pp("embeddings");
        let h = config.hidden_size;
        let word_embeddings = candle_nn::embedding(config.vocab_size, h, emb_vb.pp("word_embeddings"))?;
        let position_embeddings = candle_nn::embedding(
            config.max_position_embeddings,
            h,
            emb_vb.pp("position_embeddings"),
        )?;
        let token_type_embeddings =
            candle_nn::embedding(config.type_vocab_size, h, emb_vb.pp("token_type_embeddings"))?;
        let embedding_norm = candle_nn::layer_norm(h, config.layer_norm_eps, emb_vb.pp("LayerNorm"))?;

        let layers = (0..config.num_hidden_layers)
            .map(|i| EncoderLayer::load(vb.pp("encoder").pp("layer").pp(i.to_string()), config))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            embedding_norm,
            layers,
            device: device.clone(),
        })
    }

    /// `ids` and `mask` are row-major (batch, seq_len); returns pooled,
    /// normalised sentence vectors.
    fn forward(&self, ids: Vec<u32>, mask: Vec<f32>, batch: usize, seq_len: usize) -> Result<Vec<Vec<f32>>> {
        let ids = Tensor::from_vec(ids, (batch, seq_len), &self.device)?;
        let mask = Tensor::from_vec(mask, (batch, seq_len), &self.device)?;

        let positions = Tensor::arange(0u32, seq_len as u32, &self.device)?;
        let token_types = Tensor::zeros((batch, seq_len), DType::U32, &self.device)?;

        let hidden = self
            .word_embeddings
            .forward(&ids)?
            .broadcast_add(&self.position_embeddings.forward(&positions)?)?;
        let hidden = (hidden + self.token_type_embeddings.forward(&token_types)?)?;
        let mut hidden = self.embedding_norm.forward(&hidden)?;

        let mask_bias = mask
            .affine(10_000.0, -10_000.0)?
            .unsqueeze(1)?
            .unsqueeze(1)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &mask_bias)?;
        }

        let token_mask = mask.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&token_mask)?.sum(1)?;
        let counts = token_mask.sum(1)?.maximum(1e-9)?;
        let pooled = summed.broadcast_div(&counts)?;

        let norms = pooled.sqr()?.sum_keepdim(1)?.sqrt()?.maximum(1e-12)?;
        Ok(pooled.broadcast_div(&norms)?.to_vec2::<f32>()?)
    }
}

pub struct MiniLmEmbedder {
    encoder: BertEncoder,
    tokenizer: tokenizers::Tokenizer,
    max_len: usize,
}

impl MiniLmEmbedder {
    pub fn load(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        let config = BertConfig::for_weights(model_path)?;
        let encoder = BertEncoder::load(model_path, &config, &Device::Cpu)
            .with_context(|| format!("load weights from {}", model_path.display()))?;

        let mut tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer {}: {e}", tokenizer_path.display()))?;
        // Exported tokenizers may pad or truncate on their own; batching and
        // the position limit are handled here instead.
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(None)
            .map_err(|e| anyhow::anyhow!("disable truncation: {e}"))?;

        debug!(
            layers = config.num_hidden_layers,
            hidden = config.hidden_size,
            "loaded MiniLM encoder"
        );
        Ok(Self {
            encoder,
            tokenizer,
            max_len: config.max_position_embeddings,
        })
    }

    /// Token ids with their attention mask, cut to the position limit.
    fn encode(&self, text: &str) -> Result<(Vec<u32>, Vec<f32>)> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;
        let mut ids = encoding.get_ids().to_vec();
        let mut mask: Vec<f32> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as f32)
            .collect();
        ids.truncate(self.max_len);
        mask.truncate(self.max_len);
        Ok((ids, mask))
    }
}

impl Embedder for MiniLmEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encoded = texts
            .iter()
            .map(|t| self.encode(t))
            .collect::<Result<Vec<_>>>()?;
        let seq_len = encoded.iter().map(|(ids, _)| ids.len()).max().unwrap_or(0).max(1);

        let mut ids = Vec::with_capacity(texts.len() * seq_len);
        let mut mask = Vec::with_capacity(texts.len() * seq_len);
        for (row_ids, row_mask) in &encoded {
            ids.extend_from_slice(row_ids);
            mask.extend_from_slice(row_mask);
            ids.extend(std::iter::repeat_n(0u32, seq_len - row_ids.len()));
            mask.extend(std::iter::repeat_n(0.0f32, seq_len - row_mask.len()));
        }

        self.encoder.forward(ids, mask, texts.len(), seq_len)
    }
}
