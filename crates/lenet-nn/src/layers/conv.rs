use super::{InitKind, Layer};
use crate::error::{NetError, NetResult};
use crate::im2col::{col2im, im2col, Window};
use crate::param::{ParamRefs, ParamRefsMut, Parameter};
use crate::record::{Dims, GradRecord, TensorRecord};
use lenet_core::{Float, Tensor};
use rand::rngs::StdRng;
use rayon::prelude::*;

#[derive(Debug, Clone)]
struct ConvCache<T: Float> {
    batch: usize,
    /// One `[C·k·k, H_out·W_out]` column matrix per sample.
    cols: Vec<Tensor<T>>,
}

/// 2-D convolution lowered to a matrix product over `im2col` columns.
///
/// `W` is `[n_out, C·k·k]` and `b` is `[n_out]`; for one sample the output is
/// `W · cols + b`, whose rows are already the channel-major output planes.
/// Parameter gradients are averaged over the batch.
#[derive(Debug, Clone)]
pub struct ConvLayer<T: Float> {
    n_out_channels: usize,
    window: Window,
    init_kind: InitKind,
    input: Option<Dims>,
    output: Option<Dims>,
    weight: Parameter<T>,
    bias: Parameter<T>,
    cache: Option<ConvCache<T>>,
}

impl<T: Float> ConvLayer<T> {
    pub fn new(
        n_out_channels: usize,
        kernel_size: usize,
        stride: usize,
        pad: usize,
        init_type: &str,
    ) -> NetResult<Self> {
        if n_out_channels == 0 {
            return Err(NetError::Configuration(
                "conv layer needs n_out_channels > 0".to_string(),
            ));
        }
        Ok(ConvLayer {
            n_out_channels,
            window: Window::new(kernel_size, stride, pad)?,
            init_kind: init_type.parse()?,
            input: None,
            output: None,
            weight: Parameter::uninit(),
            bias: Parameter::uninit(),
            cache: None,
        })
    }

    pub fn n_out_channels(&self) -> usize {
        self.n_out_channels
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn weight(&self) -> &Parameter<T> {
        &self.weight
    }

    pub fn bias(&self) -> &Parameter<T> {
        &self.bias
    }

    fn shapes(&self) -> NetResult<(Dims, Dims)> {
        match (self.input, self.output) {
            (Some(i), Some(o)) => Ok((i, o)),
            _ => Err(NetError::Sequencing("conv layer used before init".to_string())),
        }
    }

    fn convolve(&self, sample: &[T], input: Dims, output: Dims) -> NetResult<(Vec<T>, Tensor<T>)> {
        let n_cols = output.height * output.width;
        let cols = Tensor::new(
            im2col(sample, input, &self.window, output),
            vec![input.channels * self.window.area(), n_cols],
        )?;
        let mut out = self.weight.value.matmul(&cols)?.into_data();
        for (plane, &b) in out.chunks_mut(n_cols).zip(self.bias.value.data()) {
            for v in plane.iter_mut() {
                *v += b;
            }
        }
        Ok((out, cols))
    }
}

impl<T: Float> Layer<T> for ConvLayer<T> {
    fn kind(&self) -> &'static str {
        "conv"
    }

    fn clear_cache(&mut self) {
        self.cache = None;
    }

    fn output_dims(&self, input: Dims) -> NetResult<Dims> {
        self.window.output_dims(input, self.n_out_channels)
    }

    fn init(&mut self, input: Dims, rng: &mut StdRng) -> NetResult<()> {
        let output = self.output_dims(input)?;
        output.ensure_positive("conv layer")?;
        let fan_in = input.channels * self.window.area();
        self.weight = Parameter::new(self.init_kind.sample(
            vec![self.n_out_channels, fan_in],
            fan_in,
            rng,
        ));
        self.bias = Parameter::new(Tensor::zeros(vec![self.n_out_channels]));
        self.input = Some(input);
        self.output = Some(output);
        self.cache = None;
        Ok(())
    }

    fn forward(&mut self, input: &TensorRecord<T>) -> NetResult<TensorRecord<T>> {
        let (in_dims, out_dims) = self.shapes()?;
        if input.dims() != in_dims {
            return Err(NetError::shape(
                "conv input",
                in_dims.to_vec(),
                input.dims().to_vec(),
            ));
        }
        let batch = input.batch_size();

        let results: Vec<(Vec<T>, Tensor<T>)> = input
            .data()
            .data()
            .par_chunks(in_dims.numel())
            .map(|sample| self.convolve(sample, in_dims, out_dims))
            .collect::<NetResult<_>>()?;

        let mut data = Vec::with_capacity(batch * out_dims.numel());
        let mut cols = Vec::with_capacity(batch);
        for (out, c) in results {
            data.extend(out);
            cols.push(c);
        }

        self.cache = Some(ConvCache { batch, cols });
        TensorRecord::new(out_dims, Tensor::new(data, vec![batch, out_dims.numel()])?)
    }

    fn backward(&mut self, output_grad: &GradRecord<T>) -> NetResult<GradRecord<T>> {
        let (in_dims, out_dims) = self.shapes()?;
        let cache = self.cache.as_ref().ok_or_else(|| {
            NetError::Sequencing("conv backward called without a preceding forward".to_string())
        })?;
        output_grad.expect_shape("conv upstream gradient", &[cache.batch, out_dims.numel()])?;

        let n_cols = out_dims.height * out_dims.width;
        let w_t = self.weight.value.t()?;
        let window = self.window;

        // Per sample: (dW_s, db_s, dx_s).
        let per_sample: Vec<(Tensor<T>, Tensor<T>, Vec<T>)> = output_grad
            .grad
            .data()
            .par_chunks(out_dims.numel())
            .zip(cache.cols.par_iter())
            .map(|(g, cols)| -> NetResult<_> {
                let g = Tensor::new(g.to_vec(), vec![self.n_out_channels, n_cols])?;
                let dw = g.matmul(&cols.t()?)?;
                let db = g.sum_axis(1)?;
                let dcols = w_t.matmul(&g)?;
                let dx = col2im(dcols.data(), in_dims, &window, out_dims);
                Ok((dw, db, dx))
            })
            .collect::<NetResult<_>>()?;

        // Summed in sample order so the result does not depend on scheduling.
        let mut grad_w = Tensor::zeros(self.weight.shape());
        let mut grad_b = Tensor::zeros(self.bias.shape());
        let mut grad_x = Vec::with_capacity(cache.batch * in_dims.numel());
        for (dw, db, dx) in per_sample {
            grad_w.scaled_add_assign(T::ONE, &dw)?;
            grad_b.scaled_add_assign(T::ONE, &db)?;
            grad_x.extend(dx);
        }
        let scale = T::from_usize(cache.batch);
        let grad_input = Tensor::new(grad_x, vec![cache.batch, in_dims.numel()])?;

        self.weight.set_grad(grad_w.div_scalar(scale))?;
        self.bias.set_grad(grad_b.div_scalar(scale))?;
        self.cache = None;
        Ok(GradRecord::new(grad_input))
    }

    fn params(&self) -> ParamRefs<'_, T> {
        vec![("w", &self.weight), ("b", &self.bias)]
    }

    fn params_mut(&mut self) -> ParamRefsMut<'_, T> {
        vec![("w", &mut self.weight), ("b", &mut self.bias)]
    }
}
