use lenet_core::{Float, Tensor};
use lenet_nn::{NetResult, Network};
use lenet_optim::Optimizer;
use tracing::info;

/// Outcome of one training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport<T: Float> {
    /// Batch loss before the update.
    pub loss: T,
    pub accuracy: T,
}

/// Batch-averaged outcome of one pass over the data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport<T: Float> {
    pub batches: usize,
    pub mean_loss: T,
    pub mean_accuracy: T,
}

/// Forward, backward, update and clear gradients as one call.
///
/// If any phase fails the gradients are cleared before the error is
/// returned, so the network is never left holding a partial backward pass.
/// Parameter values only change when the whole step succeeds.
pub fn train_step<T, O>(
    net: &mut Network<T>,
    opt: &mut O,
    batch_x: &Tensor<T>,
    batch_y: &[usize],
) -> NetResult<StepReport<T>>
where
    T: Float,
    O: Optimizer<T> + ?Sized,
{
    let result = forward_backward_step(net, opt, batch_x, batch_y);
    opt.zero_grad(net);
    result
}

fn forward_backward_step<T, O>(
    net: &mut Network<T>,
    opt: &mut O,
    batch_x: &Tensor<T>,
    batch_y: &[usize],
) -> NetResult<StepReport<T>>
where
    T: Float,
    O: Optimizer<T> + ?Sized,
{
    let cost = net.forward(batch_x, batch_y)?;
    net.backward(&cost)?;
    opt.step(net)?;
    Ok(StepReport {
        loss: cost.loss,
        accuracy: cost.accuracy,
    })
}

/// Train on every batch of `batches` in order.
///
/// `iteration` is the running step counter across epochs; the learning rate
/// is refreshed from it before each step and it is advanced once per batch.
pub fn run_epoch<T, O, I>(
    net: &mut Network<T>,
    opt: &mut O,
    batches: I,
    iteration: &mut usize,
) -> NetResult<EpochReport<T>>
where
    T: Float,
    O: Optimizer<T> + ?Sized,
    I: IntoIterator<Item = (Tensor<T>, Vec<usize>)>,
{
    let mut count = 0usize;
    let mut loss = T::ZERO;
    let mut accuracy = T::ZERO;
    for (x, y) in batches {
        opt.update_lr(*iteration);
        let report = train_step(net, opt, &x, &y)?;
        *iteration += 1;
        count += 1;
        loss += report.loss;
        accuracy += report.accuracy;
    }

    let report = if count == 0 {
        EpochReport {
            batches: 0,
            mean_loss: T::ZERO,
            mean_accuracy: T::ZERO,
        }
    } else {
        let n = T::from_usize(count);
        EpochReport {
            batches: count,
            mean_loss: loss / n,
            mean_accuracy: accuracy / n,
        }
    };
    info!(
        batches = report.batches,
        iteration = *iteration,
        lr = %opt.learning_rate(),
        mean_loss = %report.mean_loss,
        mean_accuracy = %report.mean_accuracy,
        "epoch complete"
    );
    Ok(report)
}
