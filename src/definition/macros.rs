//! Macros for declaring machines inline.

/// Declare a machine configuration with JSON syntax and start a
/// [`MachineBuilder`](crate::definition::MachineBuilder) for it.
///
/// # Example
///
/// ```
/// use eventchart::machine;
///
/// let definition = machine! {
///     "id": "light",
///     "initial": "green",
///     "states": {
///         "green": { "on": { "TIMER": "yellow" } },
///         "yellow": { "on": { "TIMER": "red" } },
///         "red": { "on": { "TIMER": "green" } }
///     }
/// }
/// .build()
/// .unwrap();
///
/// assert_eq!(definition.nodes().len(), 4);
/// ```
#[macro_export]
macro_rules! machine {
    ($($config:tt)+) => {
        $crate::definition::MachineBuilder::new($crate::__serde_json::json!({ $($config)+ }))
    };
}
