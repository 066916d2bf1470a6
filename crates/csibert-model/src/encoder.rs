//! BERT-style transformer encoder operating on precomputed embeddings.
//!
//! The regression model only depends on the [`SequenceEncoder`] capability:
//! hidden-size embeddings in, per-position hidden states (and optionally the
//! per-layer attention weights) out. [`BertEncoder`] is the stock
//! implementation, a post-LayerNorm BERT stack whose variable names follow
//! the usual `embeddings.*` / `encoder.layer.{i}.*` checkpoint layout.

use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::{embedding, layer_norm, linear, Dropout, Embedding, LayerNorm, Linear, VarBuilder};
use csibert_core::EncoderConfig;

/// Output of one encoder pass
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// Final hidden states `[batch, seq_len, hidden_size]`
    pub hidden_states: Tensor,
    /// One `[batch, heads, seq_len, seq_len]` tensor per layer, if requested
    pub attentions: Option<Vec<Tensor>>,
}

/// Transformer encoder capability consumed by the regression model
pub trait SequenceEncoder {
    /// Width of the embeddings this encoder accepts and returns
    fn hidden_size(&self) -> usize;

    /// Longest sequence the encoder can position
    fn max_positions(&self) -> usize;

    /// Encode `embeddings` `[batch, seq_len, hidden_size]`.
    ///
    /// `attention_mask` is `[batch, seq_len]` with 1 for positions that may be
    /// attended to. `train` enables dropout.
    fn encode(
        &self,
        embeddings: &Tensor,
        attention_mask: Option<&Tensor>,
        output_attentions: bool,
        train: bool,
    ) -> Result<EncoderOutput>;
}

/// Turn a `[batch, seq_len]` 0/1 mask into an additive `[batch, 1, 1, seq_len]`
/// bias: 0 where visible, `f32::MIN` where masked.
pub fn extended_attention_mask(mask: &Tensor, dtype: DType) -> Result<Tensor> {
    let (batch, seq_len) = mask.dims2()?;
    let mask = mask.to_dtype(dtype)?;
    mask.affine(-1.0, 1.0)?
        .affine(f32::MIN as f64, 0.0)?
        .reshape((batch, 1, 1, seq_len))
}

/// Absolute position + token type embeddings added to the input embeddings
struct BertEmbeddings {
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    layer_norm: LayerNorm,
    dropout: Dropout,
    max_positions: usize,
}

impl BertEmbeddings {
    fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let position_embeddings = embedding(
            config.max_position_embeddings,
            config.hidden_size,
            vb.pp("position_embeddings"),
        )?;
        let token_type_embeddings = embedding(
            config.type_vocab_size,
            config.hidden_size,
            vb.pp("token_type_embeddings"),
        )?;
        let layer_norm = layer_norm(config.hidden_size, config.layer_norm_eps, vb.pp("LayerNorm"))?;

        Ok(Self {
            position_embeddings,
            token_type_embeddings,
            layer_norm,
            dropout: Dropout::new(config.hidden_dropout_prob),
            max_positions: config.max_position_embeddings,
        })
    }

    fn forward(&self, inputs_embeds: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, seq_len, _) = inputs_embeds.dims3()?;
        if seq_len > self.max_positions {
            candle_core::bail!(
                "sequence length {} exceeds the maximum of {} position embeddings",
                seq_len,
                self.max_positions
            );
        }

        let device = inputs_embeds.device();
        let position_ids = Tensor::arange(0u32, seq_len as u32, device)?;
        let positions = self.position_embeddings.forward(&position_ids)?.unsqueeze(0)?;

        let token_type_ids = Tensor::zeros((batch, seq_len), DType::U32, device)?;
        let token_types = self.token_type_embeddings.forward(&token_type_ids)?;

        let x = inputs_embeds.broadcast_add(&positions)?;
        let x = (x + token_types)?;
        let x = self.layer_norm.forward(&x)?;
        self.dropout.forward(&x, train)
    }
}

/// Multi-head self-attention with an optional additive mask
pub struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    dropout: Dropout,
    n_heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let dim = config.hidden_size;
        if config.num_attention_heads == 0 || dim % config.num_attention_heads != 0 {
            candle_core::bail!(
                "hidden size {} is not divisible by {} attention heads",
                dim,
                config.num_attention_heads
            );
        }

        let query = linear(dim, dim, vb.pp("query"))?;
        let key = linear(dim, dim, vb.pp("key"))?;
        let value = linear(dim, dim, vb.pp("value"))?;

        Ok(Self {
            query,
            key,
            value,
            dropout: Dropout::new(config.attention_probs_dropout_prob),
            n_heads: config.num_attention_heads,
            head_dim: config.head_dim(),
        })
    }

    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = x.dims3()?;
        // [batch, heads, seq, head_dim]
        x.reshape((batch, seq_len, self.n_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// Returns the context `[batch, seq, dim]` and the attention
    /// probabilities `[batch, heads, seq, seq]`.
    pub fn forward(
        &self,
        x: &Tensor,
        mask_bias: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (batch, seq_len, dim) = x.dims3()?;

        let q = self.split_heads(&self.query.forward(x)?)?;
        let k = self.split_heads(&self.key.forward(x)?)?;
        let v = self.split_heads(&self.value.forward(x)?)?;

        let scale = (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? / scale)?;
        let scores = match mask_bias {
            Some(bias) => scores.broadcast_add(bias)?,
            None => scores,
        };
        let probs = candle_nn::ops::softmax(&scores, D::Minus1)?;

        let context = self.dropout.forward(&probs, train)?.matmul(&v)?;
        let context = context.transpose(1, 2)?.reshape((batch, seq_len, dim))?;

        Ok((context, probs))
    }
}

/// Attention + feed-forward block with residuals and post-LayerNorm
pub struct EncoderLayer {
    attention: SelfAttention,
    attention_output: Linear,
    attention_norm: LayerNorm,
    intermediate: Linear,
    output: Linear,
    output_norm: LayerNorm,
    dropout: Dropout,
}

impl EncoderLayer {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let dim = config.hidden_size;
        let attn_vb = vb.pp("attention");

        let attention = SelfAttention::new(config, attn_vb.pp("self"))?;
        let attention_output = linear(dim, dim, attn_vb.pp("output").pp("dense"))?;
        let attention_norm = layer_norm(
            dim,
            config.layer_norm_eps,
            attn_vb.pp("output").pp("LayerNorm"),
        )?;
        let intermediate = linear(
            dim,
            config.intermediate_size,
            vb.pp("intermediate").pp("dense"),
        )?;
        let output = linear(config.intermediate_size, dim, vb.pp("output").pp("dense"))?;
        let output_norm = layer_norm(dim, config.layer_norm_eps, vb.pp("output").pp("LayerNorm"))?;

        Ok(Self {
            attention,
            attention_output,
            attention_norm,
            intermediate,
            output,
            output_norm,
            dropout: Dropout::new(config.hidden_dropout_prob),
        })
    }

    pub fn forward(
        &self,
        x: &Tensor,
        mask_bias: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        // Self-attention with residual
        let (context, probs) = self.attention.forward(x, mask_bias, train)?;
        let attn_out = self.attention_output.forward(&context)?;
        let attn_out = self.dropout.forward(&attn_out, train)?;
        let x = self.attention_norm.forward(&(x + attn_out)?)?;

        // FFN with residual
        let ffn_out = self.intermediate.forward(&x)?.gelu_erf()?;
        let ffn_out = self.output.forward(&ffn_out)?;
        let ffn_out = self.dropout.forward(&ffn_out, train)?;
        let x = self.output_norm.forward(&(&x + ffn_out)?)?;

        Ok((x, probs))
    }
}

/// BERT encoder fed with embeddings instead of token ids
pub struct BertEncoder {
    embeddings: BertEmbeddings,
    layers: Vec<EncoderLayer>,
    config: EncoderConfig,
}

impl BertEncoder {
    pub fn new(config: EncoderConfig, vb: VarBuilder) -> Result<Self> {
        config.validate().map_err(candle_core::Error::wrap)?;
        let embeddings = BertEmbeddings::new(&config, vb.pp("embeddings"))?;

        let layers = (0..config.num_hidden_layers)
            .map(|i| EncoderLayer::new(&config, vb.pp(format!("encoder.layer.{}", i))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            embeddings,
            layers,
            config,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }
}

impl SequenceEncoder for BertEncoder {
    fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    fn max_positions(&self) -> usize {
        self.config.max_position_embeddings
    }

    fn encode(
        &self,
        embeddings: &Tensor,
        attention_mask: Option<&Tensor>,
        output_attentions: bool,
        train: bool,
    ) -> Result<EncoderOutput> {
        let mask_bias = attention_mask
            .map(|mask| extended_attention_mask(mask, embeddings.dtype()))
            .transpose()?;

        let mut x = self.embeddings.forward(embeddings, train)?;
        let mut attentions = Vec::with_capacity(if output_attentions { self.layers.len() } else { 0 });

        for layer in &self.layers {
            let (next, probs) = layer.forward(&x, mask_bias.as_ref(), train)?;
            if output_attentions {
                attentions.push(probs);
            }
            x = next;
        }

        Ok(EncoderOutput {
            hidden_states: x,
            attentions: output_attentions.then_some(attentions),
        })
    }
}
