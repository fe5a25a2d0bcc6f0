pub mod epoll;
pub mod eventfd;
pub mod fd;
pub mod socket;
pub mod timerfd;
