use std::{
    borrow::Cow,
    fmt::{Display, Formatter},
};

use crate::cluster::ClusterError;

#[derive(Debug)]
pub struct Error {
    pub context: Cow<'static, str>,
    pub kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:?}", self.context, self.kind)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn contextual<T: Into<ErrorKind>>(
        context: impl Into<Cow<'static, str>>,
    ) -> impl FnOnce(T) -> Self {
        move |kind| Self {
            context: context.into(),
            kind: kind.into(),
        }
    }
    pub fn contextual_custom<T: std::error::Error + Send + Sync + 'static>(
        context: impl Into<Cow<'static, str>>,
    ) -> impl FnOnce(T) -> Self {
        move |e| Self {
            context: context.into(),
            kind: ErrorKind::Custom(Box::new(e)),
        }
    }
    pub fn new(context: impl Into<Cow<'static, str>>, kind: impl Into<ErrorKind>) -> Self {
        Self {
            context: context.into(),
            kind: kind.into(),
        }
    }
    pub fn custom(
        context: impl Into<Cow<'static, str>>,
        e: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            context: context.into(),
            kind: ErrorKind::Custom(Box::new(e)),
        }
    }
}

macro_rules! error_kind {
    (
        pub enum $ErrorKind: ident {
            $($Kind: ident$(: $InnerType: ty)?),*
        }
    ) => {
        #[derive(Debug)]
        pub enum ErrorKind {
            $($Kind$(($InnerType))?,)*
        }
        $(
            $(
                impl From<$InnerType> for ErrorKind {
                    fn from(e: $InnerType) -> Self {
                        ErrorKind::$Kind(e)
                    }
                }
            )?
        )*
    };
}
error_kind! {
    pub enum ErrorKind {
        Offline,
        NotFound,
        Duplicate,
        Unauthorized,
        LimitExceeded,
        InvalidName,
        Destroyed,
        Cluster: ClusterError,
        Serde: serde_json::Error,
        Io: std::io::Error,
        Custom: Box<dyn std::error::Error + Send + Sync>
    }
}
