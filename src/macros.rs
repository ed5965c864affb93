//! Utility macros for repetitive status-enum plumbing.

/// Declare a status enum persisted as an upper-case string.
///
/// Generates serde renames, `as_str`, `Display`, `FromStr` and an `ALL` slice so
/// every status column round-trips through the same spelling in Postgres, JSON
/// and logs.
///
/// ```
/// use import_orchestrator::status_enum;
///
/// status_enum! {
///     /// Light colours
///     pub enum Light {
///         Red => "RED",
///         Green => "GREEN",
///     }
/// }
///
/// assert_eq!(Light::Red.as_str(), "RED");
/// assert_eq!("GREEN".parse::<Light>().unwrap(), Light::Green);
/// ```
#[macro_export]
macro_rules! status_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::state_machine::StateMachineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err($crate::state_machine::StateMachineError::InvalidStatus(
                        format!("{} {}", stringify!($name), other),
                    )),
                }
            }
        }
    };
}
