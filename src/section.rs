//! Wiring a loader into a section render: filter, load, merge, render.

use std::sync::Arc;

use crate::error::LoadError;
use crate::loader::Loader;
use crate::props::{filter_props, merge_props, Props};
use crate::registry::Registry;

/// Render one section with loader-provided data.
///
/// The section's full property bag is filtered down to the loader's
/// allow-list, the forward-key is submitted to the loader's batching cache,
/// and the resolved properties are overlaid onto the full bag (loader wins
/// on collision) before the component runs. If the load fails, the error
/// propagates and the component is never called.
pub async fn invoke<C, Out>(
    registry: &Registry,
    loader: &Loader,
    props: Props,
    component: C,
) -> Result<Out, LoadError>
where
    C: FnOnce(Props) -> Out,
{
    let forward = filter_props(&props, loader.forward_props());
    let batcher = registry.resolve(loader);
    let provided = batcher.load(forward).await?;
    Ok(component(merge_props(props, provided)))
}

/// A component bound to its loader: the section wrapping contract.
///
/// Where a bare component maps full properties to output, the wrapped
/// section maps full properties to a future of output, performing the
/// filter/load/merge sequence of [`invoke`] on every render. Concurrent
/// renders of sections bound to the same loader definition batch together.
pub struct Section<C> {
    registry: Arc<Registry>,
    loader: Arc<Loader>,
    component: C,
}

impl<C> Section<C> {
    pub fn new(registry: Arc<Registry>, loader: Arc<Loader>, component: C) -> Self {
        Section {
            registry,
            loader,
            component,
        }
    }

    pub async fn render<Out>(&self, props: Props) -> Result<Out, LoadError>
    where
        C: Fn(Props) -> Out,
    {
        invoke(&self.registry, &self.loader, props, &self.component).await
    }
}
