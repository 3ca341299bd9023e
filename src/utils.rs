use core::{
    future::poll_fn,
    task::Poll,
    };

/// implement [packbytes] traits for a bilge type through its raw integer representation
#[macro_export]
macro_rules! pack_bilge {
    ($t:ty, $raw:ty) => {

        impl packbytes::ToBytes for $t {
            type Bytes = [u8; core::mem::size_of::<$raw>()];

            fn to_le_bytes(self) -> Self::Bytes {
                <$raw>::from(self).to_le_bytes()
            }
            fn to_be_bytes(self) -> Self::Bytes {
                <$raw>::from(self).to_be_bytes()
            }
        }
        impl packbytes::FromBytes for $t {
            type Bytes = [u8; core::mem::size_of::<$raw>()];

            fn from_le_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from(<$raw>::from_le_bytes(bytes))
            }
            fn from_be_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from(<$raw>::from_be_bytes(bytes))
            }
        }
    };
}

/// give the executor a chance to run other tasks before continuing
pub(crate) async fn yield_now() {
    let mut yielded = false;
    poll_fn(|context| {
        if yielded
            {return Poll::Ready(())}
        yielded = true;
        context.waker().wake_by_ref();
        Poll::Pending
    }).await
}

/// first `N` bytes of a slice, if it is long enough
pub(crate) fn array<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
    bytes.get(.. N)?.try_into().ok()
}
