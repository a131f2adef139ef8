use rustix::fd::BorrowedFd;
use rustix::net::{getsockname, SocketAddrAny};
use sev_uring::{socket, Accept, Connect, IoUring, SockAddrIn, SOCK_CLOEXEC};

fn main() {
    let mut ring = IoUring::new(8).expect("Failed to create io_uring");

    println!("sev_uring example - Hello, io_uring!");
    println!(
        "Submission queue: {} entries, completion queue: {} entries",
        ring.sq_entries(),
        ring.cq_entries()
    );

    // A NOP tagged 42, submitted and harvested.
    {
        let mut slot = ring.next_slot().expect("Failed to get slot");
        slot.set_tag(42u64).expect("Failed to set tag");
        slot.nop().expect("Failed to encode nop");
    }
    let submitted = ring.submit().expect("Failed to submit");
    println!("Submitted {submitted} operation(s)");

    for cqe in ring.harvest(1, 1).expect("Failed to harvest") {
        println!("Completion: tag={} res={}", cqe.user_data, cqe.res);
    }

    // Accept and connect over loopback, both through the ring.
    let listener = socket::new_stream_socket(true, false).expect("Failed to create socket");
    socket::bind(listener, &[127, 0, 0, 1], 0).expect("Failed to bind");
    socket::listen(listener, 16).expect("Failed to listen");
    // SAFETY: `listener` stays open until the end of main.
    let port = match getsockname(unsafe { BorrowedFd::borrow_raw(listener) })
        .expect("Failed to read listener address")
    {
        SocketAddrAny::V4(v4) => v4.port(),
        other => panic!("unexpected listener address {other:?}"),
    };
    println!("Listening on 127.0.0.1:{port}");
    let client = socket::new_stream_socket(true, false).expect("Failed to create socket");
    let target = SockAddrIn::new([127, 0, 0, 1], port);

    {
        let mut slot = ring.next_slot().expect("Failed to get slot");
        slot.set_tag(1u64).expect("Failed to set tag");
        unsafe { slot.prep(&Accept::new(listener, SOCK_CLOEXEC)) }.expect("Failed to encode");
    }
    {
        let mut slot = ring.next_slot().expect("Failed to get slot");
        slot.set_tag(2u64).expect("Failed to set tag");
        unsafe { slot.prep(&Connect::new(client, target.as_bytes())) }.expect("Failed to encode");
    }
    ring.submit().expect("Failed to submit");

    let mut done = 0;
    while done < 2 {
        for cqe in ring.harvest(2, 1).expect("Failed to harvest") {
            match cqe.user_data {
                1 => println!("Accepted fd {}", cqe.res),
                _ => println!("Connect result {}", cqe.res),
            }
            if cqe.user_data == 1 && cqe.res >= 0 {
                socket::close(cqe.res).expect("Failed to close accepted socket");
            }
            done += 1;
        }
    }

    socket::close(client).expect("Failed to close client");
    socket::close(listener).expect("Failed to close listener");
    ring.destroy();
    println!("Example completed successfully!");
}
