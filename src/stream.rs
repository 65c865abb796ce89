use std::{
    cell::RefCell,
    collections::VecDeque,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use futures::Stream;

use crate::{Error, Notification, Observable, Observer, Subscription};

impl<T: 'static> Observable<T> {
    /// Exposes the observable as a [`Stream`].
    ///
    /// The observable is subscribed immediately; values produced before the stream is polled
    /// are buffered. An error is yielded once and ends the stream.
    pub fn to_stream(&self) -> impl Stream<Item = Result<T, Error>> + Unpin + 'static {
        let node = Rc::new(RefCell::new(Data {
            values: VecDeque::new(),
            is_finished: false,
            waker: None,
        }));
        let n = node.clone();
        let subscription = self.subscribe(Observer::new(move |x| {
            let mut d = n.borrow_mut();
            match x {
                Notification::Next(value) => d.values.push_back(Ok(value)),
                Notification::Error(e) => {
                    d.values.push_back(Err(e));
                    d.is_finished = true;
                }
                Notification::Completed => d.is_finished = true,
            }
            let waker = d.waker.take();
            drop(d);
            if let Some(waker) = waker {
                waker.wake();
            }
        }));
        ObservableStream {
            node,
            _subscription: subscription,
        }
    }
}

struct Data<T> {
    values: VecDeque<Result<T, Error>>,
    is_finished: bool,
    waker: Option<Waker>,
}

struct ObservableStream<T> {
    node: Rc<RefCell<Data<T>>>,
    _subscription: Subscription,
}

impl<T> Stream for ObservableStream<T> {
    type Item = Result<T, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut d = self.node.borrow_mut();
        if let Some(value) = d.values.pop_front() {
            return Poll::Ready(Some(value));
        }
        if d.is_finished {
            return Poll::Ready(None);
        }
        d.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}
