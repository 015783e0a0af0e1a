//! Default plugins a complete flowsplit installation ships with, registered at
//! priority bands: 100-block pre-explode, 200-block explode, 400/500 for
//! rebuild-side stages — the per-node rebuild stage itself sits at 450, between
//! pre-rebuild's 400 and post-rebuild's 500.

pub mod documentation;
pub mod id_normalizer;
pub mod template;
pub mod wrapped_function;

use std::sync::Arc;

use crate::stages::{PluginDescriptor, PluginHook};

/// The full set of built-in plugins, ready to hand to [`crate::PluginHost::new`]
/// alongside a [`crate::PluginSelection`].
pub fn default_plugins() -> Vec<PluginDescriptor> {
    vec![
        PluginDescriptor::new(
            id_normalizer::NAME,
            100,
            PluginHook::PreExplode(Arc::new(id_normalizer::IdNormalizerPlugin)),
        ),
        PluginDescriptor::new(
            wrapped_function::NAME,
            210,
            PluginHook::Explode(Arc::new(wrapped_function::WrappedFunctionExplode)),
        ),
        PluginDescriptor::new(
            template::NAME,
            220,
            PluginHook::Explode(Arc::new(template::TemplateExplode)),
        ),
        PluginDescriptor::new(
            documentation::NAME,
            230,
            PluginHook::Explode(Arc::new(documentation::DocumentationExplode)),
        ),
        PluginDescriptor::new(
            wrapped_function::NAME,
            450,
            PluginHook::Rebuild(Arc::new(wrapped_function::WrappedFunctionRebuild)),
        ),
        PluginDescriptor::new(
            template::NAME,
            460,
            PluginHook::Rebuild(Arc::new(template::TemplateRebuild)),
        ),
        PluginDescriptor::new(
            documentation::NAME,
            470,
            PluginHook::Rebuild(Arc::new(documentation::DocumentationRebuild)),
        ),
    ]
}
