#[cfg(all(
    not(prefork_force_poll_poll),
    any(target_os = "android", target_os = "illumos", target_os = "linux")
))]
mod epoll;

#[cfg(all(
    not(prefork_force_poll_poll),
    any(target_os = "android", target_os = "illumos", target_os = "linux")
))]
pub(crate) use self::epoll::{event, Event, Events, Selector};

#[cfg(all(
    not(prefork_force_poll_poll),
    any(
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "ios",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "tvos",
        target_os = "watchos",
    )
))]
mod kqueue;

#[cfg(all(
    not(prefork_force_poll_poll),
    any(
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "ios",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "tvos",
        target_os = "watchos",
    )
))]
pub(crate) use self::kqueue::{event, Event, Events, Selector};

#[cfg(any(
    prefork_force_poll_poll,
    not(any(
        target_os = "android",
        target_os = "illumos",
        target_os = "linux",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "ios",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "tvos",
        target_os = "watchos",
    ))
))]
mod poll;

#[cfg(any(
    prefork_force_poll_poll,
    not(any(
        target_os = "android",
        target_os = "illumos",
        target_os = "linux",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "ios",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "tvos",
        target_os = "watchos",
    ))
))]
pub(crate) use self::poll::{event, Event, Events, Selector};
