//! Macros for reducing effect boilerplate.

/// Implements [`Effect::name`](crate::Effect::name) for an effect enum by
/// returning the variant name.
///
/// Use it inside the `Effect` impl block; list every variant. Unit, tuple and
/// struct variants are all accepted.
///
/// # Example
///
/// ```
/// use reservoir_core::{effect_names, Effect};
///
/// #[derive(Debug)]
/// enum TodoEffect {
///     Load,
///     Rename(String),
///     Move { position: usize },
/// }
///
/// impl Effect for TodoEffect {
///     effect_names!(Load, Rename, Move);
/// }
///
/// assert_eq!(TodoEffect::Rename("x".into()).name(), "Rename");
/// assert_eq!(TodoEffect::Move { position: 1 }.name(), "Move");
/// ```
#[macro_export]
macro_rules! effect_names {
    ($($variant:ident),+ $(,)?) => {
        fn name(&self) -> &'static str {
            match self {
                $(Self::$variant { .. } => stringify!($variant),)+
            }
        }
    };
}
