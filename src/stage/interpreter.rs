//! Drives one stage: a single task that owns the logic and serializes every
//! signal addressed to it.

use tracing::{debug, trace};

use super::callback::{Inbox, Signal};
use super::{AsyncCallback, Attributes, Outlet, StageContext, StageLogic};
use crate::core::Result;
use crate::materializer::Materializer;

pub(crate) struct Interpreter<L: StageLogic> {
    pub(crate) logic: L,
    pub(crate) outlet: Outlet<L::Item>,
    pub(crate) inbox: Inbox<L::Event>,
    pub(crate) callback: AsyncCallback<L::Event>,
    pub(crate) attributes: Attributes,
    pub(crate) materializer: Materializer,
    pub(crate) name: String,
}

impl<L: StageLogic> Interpreter<L> {
    pub(crate) async fn run(mut self) {
        debug!(stage = %self.name, "stage starting");
        let started = {
            let (logic, mut ctx) = self.split();
            logic.pre_start(&mut ctx)
        };
        self.settle(started);

        while !self.outlet.is_closed() {
            let Some(signal) = self.inbox.recv().await else {
                break;
            };
            let handled = self.dispatch(signal);
            self.settle(handled);
        }

        self.logic.post_stop();
        let drain = self.logic.drain_handler();
        let drained = self.inbox.detach(drain);
        debug!(
            stage = %self.name,
            state = ?self.outlet.state(),
            drained,
            "stage stopped"
        );
    }

    fn dispatch(&mut self, signal: Signal<L::Event>) -> Result<()> {
        match signal {
            Signal::Pull => {
                if self.outlet.on_pull()? {
                    trace!(stage = %self.name, "pull");
                    let (logic, mut ctx) = self.split();
                    logic.on_pull(&mut ctx)?;
                }
                Ok(())
            }
            Signal::Cancel => {
                if self.outlet.on_cancel() {
                    debug!(stage = %self.name, "downstream canceled");
                    let (logic, mut ctx) = self.split();
                    logic.on_downstream_finish(&mut ctx)?;
                }
                Ok(())
            }
            Signal::Event(event) => {
                let (logic, mut ctx) = self.split();
                logic.on_event(event, &mut ctx)
            }
        }
    }

    fn settle(&mut self, result: Result<()>) {
        if let Err(error) = result {
            debug!(stage = %self.name, %error, "stage handler failed");
            self.outlet.fail(error);
        }
    }

    fn split(&mut self) -> (&mut L, StageContext<'_, L::Item, L::Event>) {
        (
            &mut self.logic,
            StageContext {
                outlet: &mut self.outlet,
                callback: &self.callback,
                attributes: &self.attributes,
                materializer: &self.materializer,
                name: &self.name,
            },
        )
    }
}
