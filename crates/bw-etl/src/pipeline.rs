use crate::stage::{Disconnected, Input, Output, Stage, StageContext};
use crate::{
    Aggregator, Consuming, PipelineError, PipelineOptions, PipelineSink, Pivot, Projector,
    StageFailure, Transformer,
};
use anyhow::anyhow;
use futures::future::join_all;
use futures::{Stream, StreamExt};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A complete pipeline, from its source to its sink
///
/// Built with [`EtlPipeline::start_with`] and the stage methods of
/// [`PipelineStep`], finished with [`PipelineStep::write_to`].
pub struct EtlPipeline {
    options: PipelineOptions,
    stages: Vec<Stage>,
}

impl EtlPipeline {
    fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            stages: Vec::new(),
        }
    }

    /// Starts a pipeline that emits `items` in order
    pub fn start_with<T, I>(items: I) -> PipelineStep<T>
    where
        T: Send + 'static,
        I: IntoIterator<Item = T> + Send + 'static,
    {
        Self::start_with_options(items, PipelineOptions::default())
    }

    pub fn start_with_options<T, I>(items: I, options: PipelineOptions) -> PipelineStep<T>
    where
        T: Send + 'static,
        I: IntoIterator<Item = T> + Send + 'static,
    {
        Self::new(options).source("start", move |ctx, output| {
            for item in items {
                output.send(ctx, item)?;
            }
            Ok(())
        })
    }

    /// Starts a pipeline fed by an asynchronous stream
    pub fn start_with_stream<T, St>(stream: St) -> PipelineStep<T>
    where
        T: Send + 'static,
        St: Stream<Item = T> + Send + 'static,
    {
        Self::start_with_stream_options(stream, PipelineOptions::default())
    }

    pub fn start_with_stream_options<T, St>(stream: St, options: PipelineOptions) -> PipelineStep<T>
    where
        T: Send + 'static,
        St: Stream<Item = T> + Send + 'static,
    {
        Self::new(options).source("start", move |ctx, output| {
            let mut stream = Box::pin(stream);
            while let Some(item) = ctx.block_on(stream.next())? {
                output.send(ctx, item)?;
            }
            Ok(())
        })
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Number of stages, sink included
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn source<T, F>(mut self, kind: &'static str, body: F) -> PipelineStep<T>
    where
        T: Send + 'static,
        F: FnOnce(&StageContext, &Output<T>) -> anyhow::Result<()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.options.capacity());
        let output = Output::new(tx);
        self.stages.push(Stage {
            kind,
            run: Box::new(move |ctx: &StageContext| body(ctx, &output)),
        });
        PipelineStep {
            pipeline: self,
            input: Input::new(rx),
        }
    }

    pub async fn execute_async(self) -> Result<(), PipelineError> {
        self.execute_with_cancellation(CancellationToken::new())
            .await
    }

    /// Runs every stage at once and waits for all of them
    ///
    /// Cancelling `cancel` unblocks every stage; each one still waiting on a
    /// queue then fails with [`BulkWriterError::Cancelled`](bw_core::BulkWriterError::Cancelled).
    /// Dropping the returned future cancels the stages as well.
    pub async fn execute_with_cancellation(
        self,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        let cancel = cancel.child_token();
        let _guard = cancel.clone().drop_guard();
        let handle = Handle::current();
        let total = self.stages.len();
        let log_steps = self.options.log_steps;

        let tasks = self.stages.into_iter().enumerate().map(|(index, stage)| {
            let step = index + 1;
            let kind = stage.kind;
            let ctx = StageContext {
                cancel: cancel.clone(),
                handle: handle.clone(),
            };
            let task = tokio::task::spawn_blocking(move || {
                if log_steps {
                    info!(stage = kind, "starting step {step} of {total}");
                }
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| (stage.run)(&ctx)))
                    .unwrap_or_else(|payload| {
                        Err(anyhow!("stage panicked: {}", panic_message(payload)))
                    });
                if log_steps {
                    info!(stage = kind, "completing step {step} of {total}");
                }
                outcome
            });
            async move { (step, kind, task.await) }
        });

        let mut failures = Vec::new();
        for (step, kind, outcome) in join_all(tasks).await {
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) if e.is::<Disconnected>() => {
                    debug!(stage = kind, "step {step} stopped early, downstream is gone");
                    continue;
                }
                Ok(Err(e)) => e,
                Err(e) => anyhow!("stage task failed: {e}"),
            };
            error!(stage = kind, "step {step} of {total} failed: {error:#}");
            failures.push(StageFailure {
                step,
                stage: kind,
                error,
            });
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::new(failures))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Runs `f` over the whole input queue, reporting an interrupted iteration
/// ahead of whatever `f` returned
fn drain<T, R>(
    ctx: &StageContext,
    input: &mut Input<T>,
    f: impl FnOnce(Consuming<'_, T>) -> anyhow::Result<R>,
) -> anyhow::Result<R> {
    let result = f(input.consume(ctx));
    if let Some(e) = input.take_interruption() {
        return Err(e.into());
    }
    result
}

/// An unfinished pipeline whose last stage produces `T`
pub struct PipelineStep<T> {
    pipeline: EtlPipeline,
    input: Input<T>,
}

impl<T: Send + 'static> PipelineStep<T> {
    fn then<U, F>(self, kind: &'static str, body: F) -> PipelineStep<U>
    where
        U: Send + 'static,
        F: FnOnce(&StageContext, Input<T>, &Output<U>) -> anyhow::Result<()> + Send + 'static,
    {
        let Self { pipeline, input } = self;
        pipeline.source(kind, move |ctx, output| body(ctx, input, output))
    }

    /// Folds everything upstream into one value, emitted once the input is exhausted
    pub fn aggregate<U, F>(self, f: F) -> PipelineStep<U>
    where
        U: Send + 'static,
        F: FnOnce(Consuming<'_, T>) -> anyhow::Result<U> + Send + 'static,
    {
        self.then("aggregate", move |ctx, mut input, output| {
            let value = drain(ctx, &mut input, f)?;
            output.send(ctx, value)
        })
    }

    pub fn aggregate_with<U, A>(self, mut aggregator: A) -> PipelineStep<U>
    where
        U: Send + 'static,
        A: Aggregator<T, U> + 'static,
    {
        self.aggregate(move |items| aggregator.aggregate(items))
    }

    /// Emits every item `f` returns for each input item, in order
    pub fn pivot<U, R, F>(self, mut f: F) -> PipelineStep<U>
    where
        U: Send + 'static,
        R: IntoIterator<Item = U>,
        F: FnMut(T) -> anyhow::Result<R> + Send + 'static,
    {
        self.then("pivot", move |ctx, mut input, output| {
            while let Some(item) = input.recv(ctx)? {
                for expanded in f(item)? {
                    output.send(ctx, expanded)?;
                }
            }
            Ok(())
        })
    }

    pub fn pivot_with<U, P>(self, mut pivot: P) -> PipelineStep<U>
    where
        U: Send + 'static,
        P: Pivot<T, U> + 'static,
    {
        self.pivot(move |item| pivot.pivot(item))
    }

    /// Maps each input item to one output item
    pub fn project<U, F>(self, mut f: F) -> PipelineStep<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> anyhow::Result<U> + Send + 'static,
    {
        self.then("project", move |ctx, mut input, output| {
            while let Some(item) = input.recv(ctx)? {
                output.send(ctx, f(item)?)?;
            }
            Ok(())
        })
    }

    pub fn project_with<U, P>(self, mut projector: P) -> PipelineStep<U>
    where
        U: Send + 'static,
        P: Projector<T, U> + 'static,
    {
        self.project(move |item| projector.project(item))
    }

    /// Mutates each item before passing it on
    pub fn transform_in_place<F>(self, mut f: F) -> PipelineStep<T>
    where
        F: FnMut(&mut T) -> anyhow::Result<()> + Send + 'static,
    {
        self.then("transform", move |ctx, mut input, output| {
            while let Some(mut item) = input.recv(ctx)? {
                f(&mut item)?;
                output.send(ctx, item)?;
            }
            Ok(())
        })
    }

    /// Applies each transformer, in the given order, to every item
    pub fn transform_in_place_all(
        self,
        mut transformers: Vec<Box<dyn Transformer<T>>>,
    ) -> PipelineStep<T> {
        self.transform_in_place(move |item| {
            transformers
                .iter_mut()
                .try_for_each(|transformer| transformer.transform(item))
        })
    }

    /// Ends the pipeline in `sink`
    pub fn write_to<S>(self, mut sink: S) -> EtlPipeline
    where
        S: PipelineSink<T> + 'static,
    {
        let Self {
            mut pipeline,
            mut input,
        } = self;
        pipeline.stages.push(Stage {
            kind: "sink",
            run: Box::new(move |ctx: &StageContext| {
                drain(ctx, &mut input, |items| sink.write(items))
            }),
        });
        pipeline
    }
}
