use super::{Kind, NsName};
use crate::events::{Event, Resource};
use futures::prelude::*;
use kube::runtime::watcher;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::{fmt, hash::Hash, pin::Pin};
use tokio::sync::mpsc;
use tokio::time;
use tracing::info;

pub struct Watch<T>(
    Pin<Box<dyn Stream<Item = Result<watcher::Event<T>, watcher::Error>> + Send + 'static>>,
);

// === impl Watch ===

impl<T, W> From<W> for Watch<T>
where
    W: Stream<Item = Result<watcher::Event<T>, watcher::Error>> + Send + 'static,
{
    fn from(watch: W) -> Self {
        Watch(watch.boxed())
    }
}

impl<T> Watch<T>
where
    T: kube::Resource + Clone + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
    T::DynamicType: Clone + Eq + Hash + Default,
{
    pub async fn recv(&mut self) -> watcher::Event<T> {
        loop {
            match self
                .0
                .next()
                .await
                .expect("watch stream must not terminate")
            {
                Ok(ev) => return ev,
                Err(error) => {
                    info!(%error, "Disconnected");
                    time::sleep(time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// Forwards a watch onto the event channel as upserts and deletes.
///
/// Relists are diffed against the key set observed so far: keys missing from
/// the relist become deletes, everything listed becomes an upsert. The store
/// reconciles to the latest value, so replaying unchanged objects is safe.
pub(crate) async fn publish<T>(mut watch: Watch<T>, kind: Kind, events: mpsc::UnboundedSender<Event>)
where
    T: kube::Resource + Clone + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
    T::DynamicType: Clone + Eq + Hash + Default,
    T: Into<Resource>,
{
    let mut known = HashSet::new();

    loop {
        let evs = match watch.recv().await {
            watcher::Event::Applied(obj) => {
                let key = NsName::from_resource(&obj);
                info!(%kind, %key, "Resource was upserted");
                known.insert(key);
                vec![Event::Upsert(obj.into())]
            }

            watcher::Event::Deleted(obj) => {
                let key = NsName::from_resource(&obj);
                info!(%kind, %key, "Resource was removed");
                known.remove(&key);
                vec![Event::Delete(kind, key)]
            }

            watcher::Event::Restarted(objs) => {
                let listed = objs
                    .iter()
                    .map(NsName::from_resource)
                    .collect::<HashSet<_>>();

                let mut evs = Vec::with_capacity(objs.len());
                for key in known.difference(&listed) {
                    info!(%kind, %key, "Resource was removed across relist");
                    evs.push(Event::Delete(kind, key.clone()));
                }
                evs.extend(objs.into_iter().map(|obj| Event::Upsert(obj.into())));
                known = listed;
                evs
            }
        };

        for ev in evs.into_iter() {
            if events.send(ev).is_err() {
                // The loop has shut down.
                return;
            }
        }
    }
}
