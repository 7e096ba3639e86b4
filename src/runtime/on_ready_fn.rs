use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project_lite::pin_project;

pin_project! {
    /// Hand the output of the stored future to a callback, synchronously, when it polls Ready.
    pub struct OnReadyFn<F, G> {
        #[pin]
        fut: F,
        callback: Option<G>,
    }
}

impl<F, G> OnReadyFn<F, G> {
    pub fn new(fut: F, callback: G) -> Self {
        let callback = Some(callback);
        Self { fut, callback }
    }
}

impl<F, G> Future for OnReadyFn<F, G>
where
    F: Future,
    G: FnOnce(F::Output),
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.project();
        match this.fut.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(out) => {
                if let Some(g) = this.callback.take() {
                    g(out);
                }
                Poll::Ready(())
            }
        }
    }
}
